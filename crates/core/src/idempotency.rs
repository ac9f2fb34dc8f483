//! Idempotency keys, owners, and record lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of the user that owns uploads and idempotency records.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(i64);

impl OwnerId {
    /// Wrap a raw id. Owner ids must be positive.
    pub fn new(id: i64) -> crate::Result<Self> {
        if id <= 0 {
            return Err(crate::Error::Validation(format!(
                "owner id must be positive, got {id}"
            )));
        }
        Ok(Self(id))
    }

    /// Parse from a header or path value.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let id = s
            .trim()
            .parse::<i64>()
            .map_err(|e| crate::Error::Validation(format!("invalid owner id '{s}': {e}")))?;
        Self::new(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId({})", self.0)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-supplied token scoping "the same logical request".
///
/// Keys are UUIDs. Anything else is rejected before a store is touched.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(Uuid);

impl IdempotencyKey {
    /// Generate a random key. Mostly useful for clients and tests.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string, typically the `X-Idempotency-Key` header.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s.trim()).map(Self).map_err(|_| {
            crate::Error::Validation("X-Idempotency-Key must be a valid UUID".to_string())
        })
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Response cache key for this owner and idempotency key.
    pub fn cache_key(&self, owner: OwnerId) -> String {
        format!("idempotency:{}:{}", owner, self.0)
    }
}

impl Default for IdempotencyKey {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for IdempotencyKey {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Debug for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdempotencyKey({})", self.0)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an idempotency record.
///
/// Transitions only move forward, except `Failed -> InProgress` on an
/// explicit client retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    /// An execution is running, or was running when the process died.
    InProgress,
    /// The upload finished and the response is stored on the record.
    Completed,
    /// The last attempt failed. The key may be retried.
    Failed,
}

impl IdempotencyStatus {
    pub const ALL: [Self; 3] = [Self::InProgress, Self::Completed, Self::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Check if the record reached a state the retention reaper may delete.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdempotencyStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(crate::Error::InternalConsistency(format!(
                "unknown idempotency status '{other}'"
            ))),
        }
    }
}

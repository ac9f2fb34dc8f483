//! Upload payloads and stored object key derivation.

use crate::idempotency::OwnerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Longest extension (including the dot) carried over into a stored key.
const MAX_EXTENSION_LEN: usize = 16;

/// Object store key for an uploaded file.
///
/// Format: `user-{owner}/{uuid}{.ext}`. A fresh key is generated for every
/// upload attempt, so concurrent uploads never collide and keys are never
/// reused.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredKey(String);

impl StoredKey {
    /// Generate a new key for `owner`, keeping the extension of `original_filename`.
    pub fn generate(owner: OwnerId, original_filename: &str) -> Self {
        let ext = extension_of(original_filename).unwrap_or_default();
        Self(format!("user-{}/{}{}", owner, Uuid::new_v4(), ext))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoredKey({})", self.0)
    }
}

impl fmt::Display for StoredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract a safe, lowercased extension (with leading dot) from a filename.
///
/// Dotfiles such as `.bashrc` have no extension. Extensions with characters
/// outside `[A-Za-z0-9]` are dropped rather than escaped.
fn extension_of(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let dot = name.rfind('.')?;
    if dot == 0 {
        return None;
    }
    let ext = &name[dot..];
    if ext.len() < 2 || ext.len() > MAX_EXTENSION_LEN {
        return None;
    }
    if !ext[1..].chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Result of a successful upload, stored verbatim on the idempotency record
/// and replayed for every retry of the same key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadResponse {
    pub file_id: i64,
    pub original_filename: String,
    pub file_size: i64,
    pub content_type: String,
    pub download_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FileUploadResponse {
    /// Serialize for storage on the idempotency record and in the cache.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a previously stored response.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// File metadata returned by read endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfoResponse {
    pub file_id: i64,
    pub original_filename: String,
    pub file_size: i64,
    pub content_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

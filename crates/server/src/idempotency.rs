//! Idempotency coordinator.
//!
//! Decides, for an (owner, key) pair, whether a request replays a stored
//! response, proceeds with new work, or conflicts with an attempt still in
//! flight. The unique (owner, key) index in the metadata store is the only
//! serialization point; there is no process-local lock.

use crate::metrics::{CACHE_ERRORS, IDEMPOTENCY_DECISIONS};
use std::sync::Arc;
use std::time::Duration;
use stowage_cache::ResponseCache;
use stowage_core::{Error, FileUploadResponse, IdempotencyKey, IdempotencyStatus, OwnerId, Result};
use stowage_metadata::{IdempotencyRecordRow, MetadataError, MetadataStore};
use time::OffsetDateTime;
use uuid::Uuid;

/// Outcome of [`IdempotencyCoordinator::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// A previous attempt completed; return its stored response.
    Replay(FileUploadResponse),
    /// The caller now owns an `in_progress` record and must do the work.
    Proceed,
    /// Another attempt with this key is still running.
    Conflict,
    /// The last attempt failed after writing a file. The caller must reclaim
    /// `file_id` and decide again before the key can be retried.
    Reclaim { record_id: i64, file_id: i64 },
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Replay(_) => "replay",
            Decision::Proceed => "proceed",
            Decision::Conflict => "conflict",
            Decision::Reclaim { .. } => "reclaim",
        }
    }
}

/// Coordinates idempotency records and the response cache.
pub struct IdempotencyCoordinator {
    metadata: Arc<dyn MetadataStore>,
    cache: Arc<dyn ResponseCache>,
    cache_ttl: Duration,
}

impl IdempotencyCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        cache: Arc<dyn ResponseCache>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            metadata,
            cache,
            cache_ttl,
        }
    }

    /// Decide what to do with a request for `(owner, key)`.
    #[tracing::instrument(skip_all, fields(owner = %owner, key = %key.as_uuid()))]
    pub async fn decide(&self, owner: OwnerId, key: IdempotencyKey) -> Result<Decision> {
        let decision = self.decide_inner(owner, key).await?;
        IDEMPOTENCY_DECISIONS
            .with_label_values(&[decision.as_str()])
            .inc();
        tracing::debug!(decision = decision.as_str(), "Idempotency decision");
        Ok(decision)
    }

    async fn decide_inner(&self, owner: OwnerId, key: IdempotencyKey) -> Result<Decision> {
        if let Some(response) = self.cached_response(owner, key).await {
            return Ok(Decision::Replay(response));
        }

        let existing = self.metadata.find_by_owner_and_key(owner, key).await?;
        let record = match existing {
            Some(record) => record,
            None => {
                match self
                    .metadata
                    .insert_in_progress(owner, key, None, OffsetDateTime::now_utc())
                    .await
                {
                    Ok(_) => return Ok(Decision::Proceed),
                    Err(MetadataError::AlreadyExists(_)) => {
                        // Lost the insert race; decide on the winner's record.
                        self.metadata
                            .find_by_owner_and_key(owner, key)
                            .await?
                            .ok_or_else(|| {
                                Error::InternalConsistency(format!(
                                    "idempotency record for owner {owner} key {} vanished after unique violation",
                                    key.as_uuid()
                                ))
                            })?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        self.decide_on_record(owner, key, record).await
    }

    async fn decide_on_record(
        &self,
        owner: OwnerId,
        key: IdempotencyKey,
        record: IdempotencyRecordRow,
    ) -> Result<Decision> {
        let status = record.status().inspect_err(|e| {
            tracing::error!(record_id = record.id, error = %e, "Idempotency record has unknown status");
        })?;

        match status {
            IdempotencyStatus::Completed => {
                let json = record.response_json.as_deref().ok_or_else(|| {
                    Error::InternalConsistency(format!(
                        "completed idempotency record {} has no stored response",
                        record.id
                    ))
                })?;
                let response = FileUploadResponse::from_json(json).map_err(|e| {
                    Error::InternalConsistency(format!(
                        "completed idempotency record {} has unreadable response: {e}",
                        record.id
                    ))
                })?;
                self.cache_response(owner, key, json).await;
                Ok(Decision::Replay(response))
            }
            IdempotencyStatus::InProgress => Ok(Decision::Conflict),
            IdempotencyStatus::Failed => {
                if let Some(file_id) = record.file_id {
                    return Ok(Decision::Reclaim {
                        record_id: record.id,
                        file_id,
                    });
                }
                let reset = self
                    .metadata
                    .reset_for_retry(record.id, OffsetDateTime::now_utc())
                    .await?;
                if reset {
                    tracing::info!(
                        record_id = record.id,
                        previous_error = record.error_message.as_deref().unwrap_or(""),
                        "Retrying failed operation"
                    );
                    Ok(Decision::Proceed)
                } else {
                    // A concurrent retry already claimed the record.
                    Ok(Decision::Conflict)
                }
            }
        }
    }

    /// Record a successful outcome and populate the cache.
    ///
    /// `file_id` must already be attached. Returns `false` when the record
    /// was no longer `in_progress` or holds another attempt's file (for
    /// example the stale reaper failed it first); the response is then
    /// neither stored nor cached.
    pub async fn complete(
        &self,
        owner: OwnerId,
        key: IdempotencyKey,
        file_id: i64,
        response: &FileUploadResponse,
    ) -> Result<bool> {
        let record = self.require_record(owner, key).await?;
        let json = response.to_json()?;

        let updated = self
            .metadata
            .mark_completed(record.id, file_id, &json, OffsetDateTime::now_utc())
            .await?;
        if !updated {
            tracing::warn!(
                record_id = record.id,
                status = %record.status,
                file_id,
                attached = ?record.file_id,
                "Idempotency record no longer owned by this attempt; response not recorded"
            );
            return Ok(false);
        }

        self.cache_response(owner, key, &json).await;
        Ok(true)
    }

    /// Record a failed outcome. Missing records are logged and ignored.
    pub async fn fail(&self, owner: OwnerId, key: IdempotencyKey, message: &str) -> Result<()> {
        let Some(record) = self.metadata.find_by_owner_and_key(owner, key).await? else {
            tracing::warn!(%owner, key = %key.as_uuid(), "No idempotency record to mark failed");
            return Ok(());
        };

        let updated = self
            .metadata
            .mark_failed(record.id, message, OffsetDateTime::now_utc())
            .await?;
        if !updated {
            tracing::debug!(
                record_id = record.id,
                status = %record.status,
                "Idempotency record was not in_progress; failure not recorded"
            );
        }
        Ok(())
    }

    /// Note the file written by the current attempt before it completes.
    ///
    /// Returns `false` when the record already holds a file or has left
    /// `in_progress`; the caller no longer owns the record.
    pub async fn attach_file(
        &self,
        owner: OwnerId,
        key: IdempotencyKey,
        file_id: i64,
    ) -> Result<bool> {
        let record = self.require_record(owner, key).await?;
        let attached = self
            .metadata
            .attach_file(record.id, file_id, OffsetDateTime::now_utc())
            .await?;
        if !attached {
            tracing::warn!(
                record_id = record.id,
                status = %record.status,
                file_id,
                attached = ?record.file_id,
                "Idempotency record no longer owned by this attempt; file not attached"
            );
        }
        Ok(attached)
    }

    /// Attach an external workflow id. Has no effect on the record state.
    pub async fn link_to_saga(
        &self,
        owner: OwnerId,
        key: IdempotencyKey,
        saga_id: Uuid,
    ) -> Result<()> {
        let record = self.require_record(owner, key).await?;
        self.metadata
            .link_to_saga(record.id, saga_id, OffsetDateTime::now_utc())
            .await?;
        tracing::debug!(record_id = record.id, %saga_id, "Linked idempotency record to saga");
        Ok(())
    }

    async fn require_record(
        &self,
        owner: OwnerId,
        key: IdempotencyKey,
    ) -> Result<IdempotencyRecordRow> {
        self.metadata
            .find_by_owner_and_key(owner, key)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "idempotency record for owner {owner} key {}",
                    key.as_uuid()
                ))
            })
    }

    /// Cache lookup. Errors and corrupt entries are misses.
    async fn cached_response(
        &self,
        owner: OwnerId,
        key: IdempotencyKey,
    ) -> Option<FileUploadResponse> {
        let cache_key = key.cache_key(owner);
        let json = match self.cache.get(&cache_key).await {
            Ok(Some(json)) => json,
            Ok(None) => return None,
            Err(e) => {
                CACHE_ERRORS.inc();
                tracing::warn!(cache_key = %cache_key, error = %e, "Response cache read failed");
                return None;
            }
        };

        match FileUploadResponse::from_json(&json) {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::warn!(cache_key = %cache_key, error = %e, "Dropping corrupt cached response");
                if let Err(e) = self.cache.delete(&cache_key).await {
                    CACHE_ERRORS.inc();
                    tracing::warn!(cache_key = %cache_key, error = %e, "Failed to delete corrupt cache entry");
                }
                None
            }
        }
    }

    async fn cache_response(&self, owner: OwnerId, key: IdempotencyKey, json: &str) {
        let cache_key = key.cache_key(owner);
        if let Err(e) = self.cache.set(&cache_key, json, self.cache_ttl).await {
            CACHE_ERRORS.inc();
            tracing::warn!(cache_key = %cache_key, error = %e, "Response cache write failed");
        }
    }
}

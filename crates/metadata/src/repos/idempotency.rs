//! Idempotency record repository.

use crate::error::MetadataResult;
use crate::models::IdempotencyRecordRow;
use async_trait::async_trait;
use stowage_core::{IdempotencyKey, IdempotencyStatus, OwnerId};
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for idempotency records.
///
/// Every state change is a conditional update. Methods returning `bool`
/// report whether the guarded transition actually happened; `false` means
/// the record was missing or another caller moved it first.
#[async_trait]
pub trait IdempotencyRepo: Send + Sync {
    /// Look up the record for an (owner, key) pair.
    async fn find_by_owner_and_key(
        &self,
        owner: OwnerId,
        key: IdempotencyKey,
    ) -> MetadataResult<Option<IdempotencyRecordRow>>;

    /// Insert a new `in_progress` record.
    ///
    /// Returns `AlreadyExists` when the unique (owner, key) index rejects the
    /// insert. That is the only signal that a concurrent caller won the race.
    async fn insert_in_progress(
        &self,
        owner: OwnerId,
        key: IdempotencyKey,
        saga_id: Option<Uuid>,
        now: OffsetDateTime,
    ) -> MetadataResult<IdempotencyRecordRow>;

    /// `in_progress` -> `completed`, storing the response payload.
    ///
    /// Only succeeds while `file_id` is the attached file (see
    /// [`IdempotencyRepo::attach_file`]), so an attempt whose record was
    /// reaped and handed to a retry cannot complete it.
    async fn mark_completed(
        &self,
        id: i64,
        file_id: i64,
        response_json: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// `in_progress` -> `failed`.
    async fn mark_failed(
        &self,
        id: i64,
        error_message: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Point an `in_progress` record at the file its current attempt wrote,
    /// ahead of completion. Lets the reapers find the file if the attempt dies.
    ///
    /// Only one file can be attached per attempt: the record must not hold
    /// a file yet.
    async fn attach_file(&self, id: i64, file_id: i64, now: OffsetDateTime)
    -> MetadataResult<bool>;

    /// Clear `file_id` on a `failed` record once its file is gone.
    async fn detach_file(&self, id: i64, file_id: i64, now: OffsetDateTime)
    -> MetadataResult<bool>;

    /// `failed` records still pointing at a file, least recently updated first.
    async fn find_failed_with_file(&self, limit: u32) -> MetadataResult<Vec<IdempotencyRecordRow>>;

    /// `failed` -> `in_progress`, clearing the previous error.
    ///
    /// Refused while the record still points at a file; the leftover must be
    /// reclaimed and detached first.
    async fn reset_for_retry(&self, id: i64, now: OffsetDateTime) -> MetadataResult<bool>;

    /// Attach an external workflow id to a record.
    async fn link_to_saga(&self, id: i64, saga_id: Uuid, now: OffsetDateTime)
    -> MetadataResult<bool>;

    /// Records in `status` whose creation and last update both predate
    /// `older_than`, oldest first.
    async fn find_stale(
        &self,
        status: IdempotencyStatus,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<IdempotencyRecordRow>>;

    /// Count of records [`IdempotencyRepo::find_stale`] would consider.
    async fn count_stale(
        &self,
        status: IdempotencyStatus,
        older_than: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// Delete records in any of `statuses` created before `older_than`.
    async fn delete_older_than(
        &self,
        statuses: &[IdempotencyStatus],
        older_than: OffsetDateTime,
    ) -> MetadataResult<u64>;
}

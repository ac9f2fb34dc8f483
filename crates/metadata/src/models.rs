//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use stowage_core::{IdempotencyKey, IdempotencyStatus, OwnerId};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Idempotency records
// =============================================================================

/// One row per (owner, idempotency key).
#[derive(Debug, Clone, FromRow)]
pub struct IdempotencyRecordRow {
    pub id: i64,
    pub user_id: i64,
    pub idempotency_key: Uuid,
    /// Raw status string. Use [`IdempotencyRecordRow::status`] to interpret it.
    pub status: String,
    /// File written by the current or last attempt. Cleared once a failed
    /// attempt's file has been reclaimed.
    pub file_id: Option<i64>,
    pub response_json: Option<String>,
    /// Set when the record is failed.
    pub error_message: Option<String>,
    /// Optional correlation id of an external workflow.
    pub saga_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl IdempotencyRecordRow {
    /// Parse the stored status. Unknown values are an internal consistency
    /// error and must never be guessed around.
    pub fn status(&self) -> stowage_core::Result<IdempotencyStatus> {
        self.status.parse()
    }

    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey::from(self.idempotency_key)
    }

    pub fn owner(&self) -> stowage_core::Result<OwnerId> {
        OwnerId::new(self.user_id)
    }
}

// =============================================================================
// Files
// =============================================================================

/// Stored file record.
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub id: i64,
    pub user_id: i64,
    pub original_filename: String,
    /// Object store key. Written once at creation and never changed.
    pub stored_filename: String,
    pub content_type: String,
    pub file_size: i64,
    pub storage_url: String,
    pub bucket_name: String,
    pub uploaded_at: OffsetDateTime,
}

/// File record to insert; the id is assigned by the database.
#[derive(Debug, Clone)]
pub struct NewFileRow {
    pub user_id: i64,
    pub original_filename: String,
    pub stored_filename: String,
    pub content_type: String,
    pub file_size: i64,
    pub storage_url: String,
    pub bucket_name: String,
    pub uploaded_at: OffsetDateTime,
}

impl From<&FileRow> for stowage_core::FileInfoResponse {
    fn from(row: &FileRow) -> Self {
        Self {
            file_id: row.id,
            original_filename: row.original_filename.clone(),
            file_size: row.file_size,
            content_type: row.content_type.clone(),
            uploaded_at: row.uploaded_at,
        }
    }
}

//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A unique constraint rejected the write. For idempotency records this
    /// means a concurrent caller inserted the same (owner, key) first.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<MetadataError> for stowage_core::Error {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::NotFound(what) => stowage_core::Error::NotFound(what),
            MetadataError::InvalidStateTransition { .. } | MetadataError::Internal(_) => {
                stowage_core::Error::InternalConsistency(e.to_string())
            }
            other => stowage_core::Error::StorageUnavailable(other.to_string()),
        }
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

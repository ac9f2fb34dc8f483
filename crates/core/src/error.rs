//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Another attempt with the same idempotency key is still in flight.
    #[error("operation with idempotency key {key} is already in progress")]
    Conflict { key: String },

    /// The attempt's record was reclaimed by cleanup before it finished;
    /// whatever it wrote has been discarded.
    #[error("upload for idempotency key {key} was reclaimed by cleanup; retry the request")]
    Abandoned { key: String },

    #[error("not found: {0}")]
    NotFound(String),

    /// Object store or metadata store failed in a way the caller may retry.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Upload body exceeded the configured maximum size.
    #[error("file exceeds maximum upload size of {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    /// Persisted state that can only result from a bug or manual tampering.
    #[error("internal consistency violation: {0}")]
    InternalConsistency(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether a client retry of the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Abandoned { .. } | Self::StorageUnavailable(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("presign failed: {0}")]
    Presign(String),

    /// The upload body stream yielded an error before completion.
    #[error("upload stream failed: {0}")]
    Stream(String),

    /// The upload body grew past the allowed size.
    #[error("upload exceeds {0} bytes")]
    TooLarge(u64),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<StorageError> for stowage_core::Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(key) => stowage_core::Error::NotFound(format!("object {key}")),
            StorageError::InvalidKey(msg) => stowage_core::Error::Validation(msg),
            // Body stream failures come from the client side of the request.
            StorageError::Stream(msg) => stowage_core::Error::Validation(msg),
            StorageError::TooLarge(limit) => stowage_core::Error::PayloadTooLarge { limit },
            other => stowage_core::Error::StorageUnavailable(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

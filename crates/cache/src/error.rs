//! Cache error types.

use thiserror::Error;

/// Cache operation errors.
///
/// Callers treat every cache error as a miss; the metadata store stays the
/// source of truth.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache configuration error: {0}")]
    Config(String),
}

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_error_display() {
        let redis_error = redis::RedisError::from(std::io::Error::other("refused"));
        let err = CacheError::from(redis_error);
        assert!(err.to_string().starts_with("redis error:"));
        assert!(err.to_string().contains("refused"));
    }
}

//! Response cache trait.

use crate::error::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Key/value cache for serialized upload responses.
///
/// Values are opaque strings. Entries may vanish at any time (expiry,
/// eviction, restart) and readers must fall back to the metadata store.
#[async_trait]
pub trait ResponseCache: Send + Sync + 'static {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store `value` under `key` for `ttl`, replacing any previous value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Remove `key`. Missing keys are not an error.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Get the backend name for logging/metrics.
    fn backend_name(&self) -> &'static str;

    async fn health_check(&self) -> CacheResult<()> {
        Ok(())
    }
}

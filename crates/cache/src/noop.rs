//! Cache that stores nothing.

use crate::error::CacheResult;
use crate::traits::ResponseCache;
use async_trait::async_trait;
use std::time::Duration;

/// Every lookup misses; every write is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl ResponseCache for NoopCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "none"
    }
}

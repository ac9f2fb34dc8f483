//! Response cache for Stowage.
//!
//! The cache is a fast path in front of the metadata store: it holds the
//! serialized response of completed uploads, keyed by owner and
//! idempotency key. It is never authoritative.

pub mod error;
pub mod memory;
pub mod noop;
pub mod redis_cache;
pub mod traits;

pub use error::{CacheError, CacheResult};
pub use memory::MemoryCache;
pub use noop::NoopCache;
pub use redis_cache::RedisCache;
pub use traits::ResponseCache;

use std::sync::Arc;
use stowage_core::config::CacheConfig;

/// Create a response cache from configuration.
pub async fn from_config(config: &CacheConfig) -> CacheResult<Arc<dyn ResponseCache>> {
    match config {
        CacheConfig::Memory { max_entries } => {
            Ok(Arc::new(MemoryCache::new(*max_entries)) as Arc<dyn ResponseCache>)
        }
        CacheConfig::Redis { url } => {
            let cache = RedisCache::connect(url).await?;
            Ok(Arc::new(cache) as Arc<dyn ResponseCache>)
        }
        CacheConfig::None => Ok(Arc::new(NoopCache) as Arc<dyn ResponseCache>),
    }
}

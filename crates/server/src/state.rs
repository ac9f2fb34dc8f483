//! Application state shared across handlers.

use crate::files::FileService;
use crate::idempotency::IdempotencyCoordinator;
use crate::orchestrator::UploadOrchestrator;
use crate::reaper::Reaper;
use std::sync::Arc;
use stowage_cache::ResponseCache;
use stowage_core::config::AppConfig;
use stowage_metadata::MetadataStore;
use stowage_storage::ObjectStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Response cache in front of completed idempotency records.
    pub cache: Arc<dyn ResponseCache>,
    pub uploads: UploadOrchestrator,
    pub files: FileService,
    pub reaper: Arc<Reaper>,
}

impl AppState {
    /// Wire the services together over the given backends.
    ///
    /// The configuration is assumed to have passed [`AppConfig::validate`].
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        cache: Arc<dyn ResponseCache>,
    ) -> Self {
        let coordinator = Arc::new(IdempotencyCoordinator::new(
            metadata.clone(),
            cache.clone(),
            config.idempotency.cache_ttl(),
        ));
        let uploads = UploadOrchestrator::new(
            coordinator,
            storage.clone(),
            metadata.clone(),
            config.idempotency.presign_ttl(),
            config.idempotency.refresh_download_url_on_replay,
        );
        let files = FileService::new(
            storage.clone(),
            metadata.clone(),
            config.idempotency.presign_ttl(),
        );
        let reaper = Arc::new(Reaper::new(
            storage.clone(),
            metadata.clone(),
            config.cleanup.clone(),
        ));

        Self {
            config: Arc::new(config),
            storage,
            metadata,
            cache,
            uploads,
            files,
            reaper,
        }
    }

    /// Largest multipart body accepted on the upload route. Leaves headroom
    /// over the file limit for multipart framing.
    pub fn upload_body_limit(&self) -> usize {
        const MULTIPART_OVERHEAD: u64 = 64 * 1024;
        let limit = self
            .config
            .server
            .max_upload_size_bytes
            .saturating_add(MULTIPART_OVERHEAD);
        usize::try_from(limit).unwrap_or(usize::MAX)
    }
}

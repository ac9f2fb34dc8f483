//! Object store gateway for Stowage.
//!
//! This crate provides:
//! - Streaming writes with authoritative byte counts
//! - Idempotent deletes
//! - Time-limited download links
//! - Backends: local filesystem and S3-compatible

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectStore, PutResult, StreamingUpload};

use std::sync::Arc;
use stowage_core::config::StorageConfig;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem {
            path,
            public_base_url,
        } => {
            let backend = FilesystemBackend::new(path)
                .await?
                .with_public_base_url(public_base_url.clone());
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_from_config_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::Filesystem {
            path: dir.path().join("objects"),
            public_base_url: None,
        };
        let store = from_config(&config).await.unwrap();
        assert_eq!(store.backend_name(), "filesystem");

        store
            .put("user-1/a.txt", Bytes::from_static(b"abc"), "text/plain")
            .await
            .unwrap();
        assert!(dir.path().join("objects/user-1/a.txt").exists());
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid() {
        let config = StorageConfig::S3 {
            bucket: "b".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("k".to_string()),
            secret_access_key: None,
            force_path_style: false,
        };
        let err = from_config(&config).await.err().unwrap();
        assert!(matches!(err, StorageError::Config(_)));
    }
}

//! Read, download, list and delete operations on stored files.

use std::sync::Arc;
use std::time::Duration;
use stowage_core::{Error, FileInfoResponse, OwnerId, Result};
use stowage_metadata::{FileRepo, FileRow, MetadataStore};
use stowage_storage::ObjectStore;

/// Largest page accepted by [`FileService::list_user_files`].
pub const MAX_PAGE_SIZE: u32 = 100;

/// File operations scoped to a single owner.
#[derive(Clone)]
pub struct FileService {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    presign_ttl: Duration,
}

impl FileService {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        presign_ttl: Duration,
    ) -> Self {
        Self {
            storage,
            metadata,
            presign_ttl,
        }
    }

    async fn owned_file(&self, file_id: i64, owner: OwnerId) -> Result<FileRow> {
        self.metadata
            .get_file_for_owner(file_id, owner)
            .await?
            .ok_or_else(|| Error::NotFound(format!("file {file_id}")))
    }

    pub async fn get_file_info(&self, file_id: i64, owner: OwnerId) -> Result<FileInfoResponse> {
        let file = self.owned_file(file_id, owner).await?;
        Ok(FileInfoResponse::from(&file))
    }

    /// Presign a fresh download link for a file.
    pub async fn get_download_url(&self, file_id: i64, owner: OwnerId) -> Result<String> {
        let file = self.owned_file(file_id, owner).await?;
        Ok(self
            .storage
            .presign_download(&file.stored_filename, self.presign_ttl)
            .await?)
    }

    /// Delete the object, then its record.
    ///
    /// An object that is already gone does not block removal of the record.
    pub async fn delete_file(&self, file_id: i64, owner: OwnerId) -> Result<()> {
        let file = self.owned_file(file_id, owner).await?;

        let removed = self
            .storage
            .delete_if_exists(&file.stored_filename)
            .await?;
        if !removed {
            tracing::warn!(
                file_id,
                key = %file.stored_filename,
                "Object already missing while deleting file"
            );
        }

        if !self.metadata.delete_file(file_id).await? {
            return Err(Error::NotFound(format!("file {file_id}")));
        }
        tracing::info!(file_id, user_id = owner.get(), "Deleted file");
        Ok(())
    }

    /// One page of the owner's files, newest first.
    pub async fn list_user_files(
        &self,
        owner: OwnerId,
        page: u32,
        size: u32,
    ) -> Result<Vec<FileInfoResponse>> {
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(Error::Validation(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {size}"
            )));
        }
        let offset = page.checked_mul(size).ok_or_else(|| {
            Error::Validation(format!("page {page} is out of range"))
        })?;

        let rows = self
            .metadata
            .list_files_for_owner(owner, size, offset)
            .await?;
        Ok(rows.iter().map(FileInfoResponse::from).collect())
    }

    pub async fn count_user_files(&self, owner: OwnerId) -> Result<u64> {
        Ok(self.metadata.count_files_for_owner(owner).await?)
    }
}

//! File record repository.

use crate::error::MetadataResult;
use crate::models::{FileRow, NewFileRow};
use async_trait::async_trait;
use stowage_core::OwnerId;

/// Repository for stored file records.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Insert a file record, returning it with its assigned id.
    async fn insert_file(&self, file: &NewFileRow) -> MetadataResult<FileRow>;

    /// Get a file by id regardless of owner.
    async fn get_file(&self, id: i64) -> MetadataResult<Option<FileRow>>;

    /// Get a file by id, only if `owner` owns it.
    async fn get_file_for_owner(&self, id: i64, owner: OwnerId) -> MetadataResult<Option<FileRow>>;

    /// Files owned by `owner`, newest first.
    async fn list_files_for_owner(
        &self,
        owner: OwnerId,
        limit: u32,
        offset: u32,
    ) -> MetadataResult<Vec<FileRow>>;

    async fn count_files_for_owner(&self, owner: OwnerId) -> MetadataResult<u64>;

    /// Delete a file record. Returns whether a row was removed.
    async fn delete_file(&self, id: i64) -> MetadataResult<bool>;
}

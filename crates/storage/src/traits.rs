//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;

/// A boxed stream of bytes for streaming reads and writes.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Outcome of a completed write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutResult {
    /// Where the object lives, e.g. `http://minio:9000/bucket/key`.
    pub locator: String,
    /// Bytes actually written. Authoritative over any client-declared length.
    pub bytes_written: u64,
}

/// Object store trait for byte-object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's full contents.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Start a streaming upload. Nothing is visible under `key` until
    /// [`StreamingUpload::finish`] succeeds.
    async fn put_stream(
        &self,
        key: &str,
        content_type: &str,
    ) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object. Returns `NotFound` if it does not exist.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Generate a time-limited download URL for an object.
    async fn presign_download(&self, key: &str, ttl: Duration) -> StorageResult<String>;

    /// Stable locator recorded alongside the key in file metadata.
    fn locator(&self, key: &str) -> String;

    /// Name of the bucket or root directory holding objects.
    fn container_name(&self) -> &str;

    /// Get the backend name for logging/metrics.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable and writable.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Write a complete body from memory.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<PutResult> {
        let stream: ByteStream = Box::pin(futures::stream::once(async move { Ok(data) }));
        self.put_byte_stream(key, content_type, stream).await
    }

    /// Drain `body` into a new object under `key`, chunk by chunk.
    ///
    /// Each chunk is written before the next is polled, so backpressure from
    /// the backend reaches the producer. On any error the partial upload is
    /// aborted and the original error is returned.
    async fn put_byte_stream(
        &self,
        key: &str,
        content_type: &str,
        mut body: ByteStream,
    ) -> StorageResult<PutResult> {
        let mut upload = self.put_stream(key, content_type).await?;

        while let Some(next) = body.next().await {
            let written = match next {
                Ok(chunk) => upload.write(chunk).await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                if let Err(abort_err) = upload.abort().await {
                    tracing::warn!(
                        key = %key,
                        error = %abort_err,
                        "Failed to abort partial upload"
                    );
                }
                return Err(e);
            }
        }

        let bytes_written = upload.finish().await?;
        Ok(PutResult {
            locator: self.locator(key),
            bytes_written,
        })
    }

    /// Delete an object, treating a missing object as success.
    ///
    /// Returns whether an object was actually removed.
    async fn delete_if_exists(&self, key: &str) -> StorageResult<bool> {
        match self.delete(key).await {
            Ok(()) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Streaming upload handle.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload, returning total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, discarding anything written so far.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

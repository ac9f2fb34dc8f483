//! Object store wrapper for unit tests that need to stall or break storage.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use stowage_storage::{
    FilesystemBackend, ObjectStore, StorageError, StorageResult, StreamingUpload,
};
use tokio::sync::oneshot;

type Gate = (oneshot::Sender<()>, oneshot::Receiver<()>);

/// Filesystem store that can hold the next presign and fail deletes.
pub(crate) struct HookedStore {
    inner: FilesystemBackend,
    fail_deletes: AtomicBool,
    presign_gate: Mutex<Option<Gate>>,
}

impl HookedStore {
    pub(crate) fn new(inner: FilesystemBackend) -> Self {
        Self {
            inner,
            fail_deletes: AtomicBool::new(false),
            presign_gate: Mutex::new(None),
        }
    }

    pub(crate) fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Hold the next `presign_download`. The first receiver fires once the
    /// call is held; sending on the returned sender lets it continue.
    pub(crate) fn hold_next_presign(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (held_tx, held_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.presign_gate.lock().unwrap() = Some((held_tx, release_rx));
        (held_rx, release_tx)
    }
}

#[async_trait]
impl ObjectStore for HookedStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put_stream(
        &self,
        key: &str,
        content_type: &str,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        self.inner.put_stream(key, content_type).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("delete refused")));
        }
        self.inner.delete(key).await
    }

    async fn presign_download(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        let gate = self.presign_gate.lock().unwrap().take();
        if let Some((held, release)) = gate {
            let _ = held.send(());
            let _ = release.await;
        }
        self.inner.presign_download(key, ttl).await
    }

    fn locator(&self, key: &str) -> String {
        self.inner.locator(key)
    }

    fn container_name(&self) -> &str {
        self.inner.container_name()
    }

    fn backend_name(&self) -> &'static str {
        "hooked"
    }
}

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stowage_storage::{ObjectStore, StorageError, StorageResult, StreamingUpload};

/// In-memory backend that counts streaming calls.
///
/// Writes become visible only on `finish`, and a write can be made to fail
/// once `fail_after_writes` chunks have landed.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingBackend {
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
    pub writes: Arc<AtomicUsize>,
    pub aborts: Arc<AtomicUsize>,
    pub finishes: Arc<AtomicUsize>,
    fail_after_writes: Option<usize>,
}

#[allow(dead_code)]
impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(writes: usize) -> Self {
        Self {
            fail_after_writes: Some(writes),
            ..Self::default()
        }
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStore for RecordingBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.object(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put_stream(
        &self,
        key: &str,
        _content_type: &str,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        Ok(Box::new(RecordingUpload {
            key: key.to_string(),
            buffer: Vec::new(),
            objects: self.objects.clone(),
            writes: self.writes.clone(),
            aborts: self.aborts.clone(),
            finishes: self.finishes.clone(),
            fail_after_writes: self.fail_after_writes,
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn presign_download(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        Ok(format!("mem://{key}?ttl={}", ttl.as_secs()))
    }

    fn locator(&self, key: &str) -> String {
        format!("mem://{key}")
    }

    fn container_name(&self) -> &str {
        "memory"
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}

struct RecordingUpload {
    key: String,
    buffer: Vec<u8>,
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
    writes: Arc<AtomicUsize>,
    aborts: Arc<AtomicUsize>,
    finishes: Arc<AtomicUsize>,
    fail_after_writes: Option<usize>,
}

#[async_trait]
impl StreamingUpload for RecordingUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        let done = self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_after_writes.is_some_and(|limit| done >= limit) {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        self.finishes.fetch_add(1, Ordering::SeqCst);
        let len = self.buffer.len() as u64;
        self.objects
            .lock()
            .unwrap()
            .insert(self.key, Bytes::from(self.buffer));
        Ok(len)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

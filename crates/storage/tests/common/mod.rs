pub mod mocks;

use bytes::Bytes;
use futures::stream;
use stowage_storage::{ByteStream, StorageError};

#[allow(unused_imports)]
pub use mocks::RecordingBackend;

/// Deterministic test data from a seeded LCG.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }
    Bytes::from(data)
}

/// A body that yields `chunks` in order.
#[allow(dead_code)]
pub fn body_of(chunks: Vec<Bytes>) -> ByteStream {
    Box::pin(stream::iter(chunks.into_iter().map(Ok)))
}

/// A body that yields `chunks` and then fails with a client-side stream error.
#[allow(dead_code)]
pub fn failing_body(chunks: Vec<Bytes>) -> ByteStream {
    let items = chunks
        .into_iter()
        .map(Ok)
        .chain(std::iter::once(Err(StorageError::Stream(
            "connection reset by peer".to_string(),
        ))));
    Box::pin(stream::iter(items))
}

//! Test fixtures for building upload requests.

use axum::body::Body;
use axum::http::Request;
use bytes::Bytes;
use uuid::Uuid;

/// Multipart boundary used by [`multipart_body`].
pub const BOUNDARY: &str = "stowage-test-boundary";

/// Generate deterministic test data based on a seed.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// A single-part multipart body holding `data` under `field`.
pub fn multipart_body(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Upload request parameters with sensible defaults.
#[derive(Clone, Debug)]
pub struct UploadForm {
    pub user_id: Option<String>,
    pub key: Option<String>,
    pub saga_id: Option<String>,
    pub field: String,
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

#[allow(dead_code)]
impl UploadForm {
    pub fn new(user_id: i64, key: Uuid, data: &'static [u8]) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            key: Some(key.to_string()),
            saga_id: None,
            field: "file".to_string(),
            filename: "hello.txt".to_string(),
            content_type: "text/plain".to_string(),
            data: Bytes::from_static(data),
        }
    }

    pub fn with_data(mut self, data: Bytes) -> Self {
        self.data = data;
        self
    }

    pub fn into_request(self) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/files/upload")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            );
        if let Some(user_id) = &self.user_id {
            builder = builder.header("X-User-Id", user_id);
        }
        if let Some(key) = &self.key {
            builder = builder.header("X-Idempotency-Key", key);
        }
        if let Some(saga_id) = &self.saga_id {
            builder = builder.header("X-Saga-Id", saga_id);
        }
        let body = multipart_body(&self.field, &self.filename, &self.content_type, &self.data);
        builder.body(Body::from(body)).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        let a = seeded_bytes(42, 100);
        let b = seeded_bytes(42, 100);
        assert_eq!(a, b);

        let c = seeded_bytes(43, 100);
        assert_ne!(a, c);
    }

    #[test]
    fn test_multipart_body_frames_data() {
        let body = multipart_body("file", "a.txt", "text/plain", b"hello");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with(&format!("--{BOUNDARY}\r\n")));
        assert!(text.contains("name=\"file\"; filename=\"a.txt\""));
        assert!(text.ends_with(&format!("hello\r\n--{BOUNDARY}--\r\n")));
    }
}

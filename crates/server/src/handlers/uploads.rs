//! Upload handler.
//!
//! The multipart field borrows the request, but the upload itself runs on a
//! spawned task so that it finishes even if the client goes away. The two
//! are joined by a small channel: the handler pumps field chunks in, the
//! task drains a `'static` stream out. If the handler is dropped before the
//! body ends, the stream yields an error and the attempt is marked failed.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{
    IDEMPOTENCY_KEY_HEADER, SAGA_ID_HEADER, header_str, owner_from_headers, required_header,
};
use crate::orchestrator::UploadRequest;
use crate::state::AppState;
use axum::Json;
use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use stowage_core::{FileUploadResponse, IdempotencyKey};
use stowage_storage::{ByteStream, StorageError};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Multipart field holding the file body.
const FILE_FIELD: &str = "file";

/// Chunks buffered between the request and the storage write.
const PUMP_CAPACITY: usize = 8;

#[derive(Debug)]
enum BodyFrame {
    Chunk(Bytes),
    End,
    Error(StorageError),
}

/// POST /files/upload - Upload a file under an idempotency key.
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<FileUploadResponse>> {
    // Reject malformed requests before any store is touched.
    let owner = owner_from_headers(&headers)?;
    let key = IdempotencyKey::parse(required_header(&headers, IDEMPOTENCY_KEY_HEADER)?)?;
    let saga_id = header_str(&headers, SAGA_ID_HEADER)?
        .filter(|value| !value.is_empty())
        .map(|value| {
            Uuid::parse_str(value)
                .map_err(|_| ApiError::BadRequest("X-Saga-Id must be a valid UUID".to_string()))
        })
        .transpose()?;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                return Err(ApiError::BadRequest(format!(
                    "missing multipart field '{FILE_FIELD}'"
                )));
            }
            Err(e) => return Err(ApiError::BadRequest(format!("invalid multipart body: {e}"))),
        };
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("file part must have a filename".to_string()))?;
        let content_type = field.content_type().map(str::to_string);

        tracing::info!(
            user_id = owner.get(),
            key = %key.as_uuid(),
            filename = %filename,
            "Received file upload"
        );

        let request = UploadRequest {
            owner,
            key,
            saga_id,
            filename,
            content_type,
        };

        let limit = state.config.server.max_upload_size_bytes;
        let (tx, rx) = mpsc::channel(PUMP_CAPACITY);
        let upload = state.uploads.handle_upload(request, frame_stream(rx));
        let (result, ()) = tokio::join!(upload, pump_field(field, tx, limit));

        return Ok(Json(result?));
    }
}

/// Forward field chunks until the body ends, fails, exceeds `limit`, or the
/// consumer stops listening.
async fn pump_field(mut field: Field<'_>, tx: mpsc::Sender<BodyFrame>, limit: u64) {
    let mut received: u64 = 0;
    loop {
        let frame = match field.chunk().await {
            Ok(Some(chunk)) => {
                received = received.saturating_add(chunk.len() as u64);
                if received > limit {
                    BodyFrame::Error(StorageError::TooLarge(limit))
                } else {
                    BodyFrame::Chunk(chunk)
                }
            }
            Ok(None) => BodyFrame::End,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                BodyFrame::Error(StorageError::TooLarge(limit))
            }
            Err(e) => BodyFrame::Error(StorageError::Stream(e.to_string())),
        };

        let last = !matches!(frame, BodyFrame::Chunk(_));
        // A closed channel means the upload was replayed, rejected, or failed.
        if tx.send(frame).await.is_err() || last {
            return;
        }
    }
}

/// Turn pumped frames into a body stream. A sender that disappears without
/// sending `End` surfaces as a stream error, never as a short body.
fn frame_stream(mut rx: mpsc::Receiver<BodyFrame>) -> ByteStream {
    Box::pin(async_stream::stream! {
        loop {
            match rx.recv().await {
                Some(BodyFrame::Chunk(chunk)) => yield Ok(chunk),
                Some(BodyFrame::End) => break,
                Some(BodyFrame::Error(e)) => {
                    yield Err(e);
                    break;
                }
                None => {
                    yield Err(StorageError::Stream(
                        "request body ended before upload completed".to_string(),
                    ));
                    break;
                }
            }
        }
    })
}

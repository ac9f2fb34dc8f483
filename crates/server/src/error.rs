//! API error types.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Core(#[from] stowage_core::Error),
}

impl From<stowage_storage::StorageError> for ApiError {
    fn from(e: stowage_storage::StorageError) -> Self {
        Self::Core(e.into())
    }
}

impl From<stowage_metadata::MetadataError> for ApiError {
    fn from(e: stowage_metadata::MetadataError) -> Self {
        Self::Core(e.into())
    }
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        use stowage_core::Error as E;
        match self {
            Self::BadRequest(_) => "INVALID_ARGUMENT",
            Self::PayloadTooLarge(_) => "FILE_TOO_LARGE",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Core(e) => match e {
                E::Conflict { .. } => "IDEMPOTENCY_CONFLICT",
                E::Abandoned { .. } => "UPLOAD_ABANDONED",
                E::NotFound(_) => "RESOURCE_NOT_FOUND",
                E::Validation(_) => "INVALID_ARGUMENT",
                E::PayloadTooLarge { .. } => "FILE_TOO_LARGE",
                E::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
                E::InternalConsistency(_) | E::Serialization(_) => "INTERNAL_ERROR",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        use stowage_core::Error as E;
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Core(e) => match e {
                E::Conflict { .. } | E::Abandoned { .. } => StatusCode::CONFLICT,
                E::NotFound(_) => StatusCode::NOT_FOUND,
                E::Validation(_) => StatusCode::BAD_REQUEST,
                E::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                E::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                E::InternalConsistency(_) | E::Serialization(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Message returned to clients. Server-side failures are replaced with a
    /// generic message; the details only go to the log.
    fn public_message(&self) -> String {
        match self.status_code() {
            StatusCode::SERVICE_UNAVAILABLE => {
                "File storage service is temporarily unavailable".to_string()
            }
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        } else {
            tracing::info!(code = self.code(), error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.public_message(),
        };
        let retryable = matches!(&self, Self::Core(e) if e.is_retryable());
        let mut response = (status, Json(body)).into_response();
        if retryable {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

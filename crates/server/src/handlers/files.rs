//! File read, download, list and delete handlers.

use crate::error::{ApiError, ApiResult};
use crate::files::MAX_PAGE_SIZE;
use crate::handlers::common::owner_from_headers;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use stowage_core::FileInfoResponse;

const DEFAULT_PAGE_SIZE: i64 = 20;

/// Query parameters for listing files.
#[derive(Debug, Deserialize)]
pub struct ListFilesParams {
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub size: i64,
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

/// Download link response.
#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadUrlResponse {
    pub download_url: String,
}

/// GET /files - List the caller's files, newest first.
pub async fn list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListFilesParams>,
) -> ApiResult<Json<Vec<FileInfoResponse>>> {
    let owner = owner_from_headers(&headers)?;
    let page = u32::try_from(params.page)
        .map_err(|_| ApiError::BadRequest(format!("page must be >= 0, got {}", params.page)))?;
    let size = u32::try_from(params.size)
        .ok()
        .filter(|size| (1..=MAX_PAGE_SIZE).contains(size))
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                params.size
            ))
        })?;

    tracing::debug!(user_id = owner.get(), page, size, "Listing files");
    let files = state.files.list_user_files(owner, page, size).await?;
    Ok(Json(files))
}

/// GET /files/{id} - File metadata.
pub async fn get_file_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(file_id): Path<i64>,
) -> ApiResult<Json<FileInfoResponse>> {
    let owner = owner_from_headers(&headers)?;
    Ok(Json(state.files.get_file_info(file_id, owner).await?))
}

/// GET /files/{id}/download - Fresh presigned download link.
pub async fn get_download_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(file_id): Path<i64>,
) -> ApiResult<Json<DownloadUrlResponse>> {
    let owner = owner_from_headers(&headers)?;
    let download_url = state.files.get_download_url(file_id, owner).await?;
    Ok(Json(DownloadUrlResponse { download_url }))
}

/// DELETE /files/{id} - Delete a file and its object.
pub async fn delete_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(file_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let owner = owner_from_headers(&headers)?;
    state.files.delete_file(file_id, owner).await?;
    Ok(StatusCode::NO_CONTENT)
}

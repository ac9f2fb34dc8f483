//! On-demand cleanup endpoints.
//!
//! These run the same sweeps as the background reapers. They are meant for
//! operators and should not be exposed beyond the internal network.

use crate::error::ApiResult;
use crate::reaper::SweepStats;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

/// Stale candidate count.
#[derive(Debug, Serialize, Deserialize)]
pub struct StaleCountResponse {
    pub count: u64,
}

/// Retention sweep result.
#[derive(Debug, Serialize, Deserialize)]
pub struct RetentionResponse {
    pub deleted: u64,
}

/// POST /admin/cleanup/stale - Run a stale operation sweep now.
pub async fn run_stale_cleanup(State(state): State<AppState>) -> ApiResult<Json<SweepStats>> {
    tracing::info!("Manual stale operation sweep requested");
    Ok(Json(state.reaper.run_stale_sweep().await?))
}

/// GET /admin/cleanup/stale/count - Count records a stale sweep would touch.
pub async fn count_stale_operations(
    State(state): State<AppState>,
) -> ApiResult<Json<StaleCountResponse>> {
    let count = state.reaper.count_stale_operations().await?;
    Ok(Json(StaleCountResponse { count }))
}

/// POST /admin/cleanup/retention - Run a retention sweep now.
pub async fn run_retention_cleanup(
    State(state): State<AppState>,
) -> ApiResult<Json<RetentionResponse>> {
    tracing::info!("Manual retention sweep requested");
    let deleted = state.reaper.run_retention_sweep().await?;
    Ok(Json(RetentionResponse { deleted }))
}

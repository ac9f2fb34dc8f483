//! Health check handler.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub storage: String,
    pub metadata: String,
}

/// GET /health - Verify the object store and metadata store respond.
///
/// Unauthenticated for load balancers and orchestrator checks. Any failing dependency
/// turns into a 503 with the generic unavailable message.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;
    state.storage.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: state.storage.backend_name().to_string(),
        metadata: state.metadata.backend_name().to_string(),
    }))
}

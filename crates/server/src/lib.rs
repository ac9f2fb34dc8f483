//! HTTP server for Stowage, an idempotent file upload service.
//!
//! This crate provides:
//! - The idempotency coordinator deciding replay, proceed or conflict
//! - Upload orchestration over the object and metadata stores
//! - File read, download, list and delete endpoints
//! - Stale operation and retention reapers, scheduled and on demand

pub mod error;
pub mod files;
pub mod handlers;
pub mod idempotency;
pub mod metrics;
pub mod orchestrator;
pub mod reaper;
pub mod routes;
pub mod state;

#[cfg(test)]
mod testing;

pub use error::ApiError;
pub use files::FileService;
pub use idempotency::{Decision, IdempotencyCoordinator};
pub use orchestrator::{UploadOrchestrator, UploadRequest};
pub use reaper::{Reaper, SweepStats};
pub use routes::create_router;
pub use state::AppState;

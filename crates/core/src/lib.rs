//! Core domain types and shared logic for Stowage.
//!
//! This crate defines the data model used across all other crates:
//! - Owner identifiers and idempotency keys
//! - Idempotency record lifecycle states
//! - Upload and file info response payloads
//! - Stored object key derivation
//! - Application configuration

pub mod config;
pub mod error;
pub mod idempotency;
pub mod upload;

pub use error::{Error, Result};
pub use idempotency::{IdempotencyKey, IdempotencyStatus, OwnerId};
pub use upload::{FileInfoResponse, FileUploadResponse, StoredKey};

/// Content type recorded when the client does not send one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Message attached to records failed by the stale operation reaper.
pub const STALE_TIMEOUT_MESSAGE: &str = "Operation timeout - cleaned up by background job";

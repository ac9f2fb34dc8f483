//! HTTP request handlers.

pub mod admin;
pub mod common;
pub mod files;
pub mod health;
pub mod uploads;

pub use admin::*;
pub use files::*;
pub use health::*;
pub use uploads::*;

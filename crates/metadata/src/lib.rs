//! Metadata store abstraction and implementations for Stowage.
//!
//! Two tables back the upload protocol:
//! - `idempotency_records`: one row per (owner, idempotency key), carrying
//!   the record lifecycle and the stored response of a completed upload
//! - `files`: one row per stored object
//!
//! SQLite serves tests and single-node deployments; PostgreSQL is the
//! production backend. Both enforce the unique (owner, key) index that
//! decides concurrent first requests.

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{FileRow, IdempotencyRecordRow, NewFileRow};
pub use postgres::PostgresStore;
pub use repos::{FileRepo, IdempotencyRepo};
pub use store::{MetadataStore, SqliteStore};

use std::sync::Arc;
use stowage_core::config::MetadataConfig;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
        MetadataConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let store = if let Some(url) = url {
                tracing::info!("Connecting to PostgreSQL using connection URL");
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?
            } else {
                return Err(MetadataError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}

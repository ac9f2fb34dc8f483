//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{FileRepo, IdempotencyRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: IdempotencyRepo + FileRepo + Send + Sync {
    /// Create tables and indexes if they do not exist.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}

/// Whether a database error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // Single writer connection; concurrent requests queue on the pool
            // instead of failing with "database is locked".
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::info!(path = %path.display(), "Opened SQLite metadata store");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use stowage_core::{IdempotencyKey, IdempotencyStatus, OwnerId};
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl IdempotencyRepo for SqliteStore {
        async fn find_by_owner_and_key(
            &self,
            owner: OwnerId,
            key: IdempotencyKey,
        ) -> MetadataResult<Option<IdempotencyRecordRow>> {
            let row = sqlx::query_as::<_, IdempotencyRecordRow>(
                "SELECT * FROM idempotency_records WHERE user_id = ? AND idempotency_key = ?",
            )
            .bind(owner.get())
            .bind(*key.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn insert_in_progress(
            &self,
            owner: OwnerId,
            key: IdempotencyKey,
            saga_id: Option<Uuid>,
            now: OffsetDateTime,
        ) -> MetadataResult<IdempotencyRecordRow> {
            let result = sqlx::query_as::<_, IdempotencyRecordRow>(
                r#"
                INSERT INTO idempotency_records
                    (user_id, idempotency_key, status, saga_id, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(owner.get())
            .bind(*key.as_uuid())
            .bind(IdempotencyStatus::InProgress.as_str())
            .bind(saga_id)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(row) => Ok(row),
                Err(e) if is_unique_violation(&e) => Err(MetadataError::AlreadyExists(format!(
                    "idempotency record for owner {owner} key {}",
                    key.as_uuid()
                ))),
                Err(e) => Err(e.into()),
            }
        }

        async fn mark_completed(
            &self,
            id: i64,
            file_id: i64,
            response_json: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE idempotency_records
                SET status = ?, response_json = ?, error_message = NULL, updated_at = ?
                WHERE id = ? AND status = ? AND file_id = ?
                "#,
            )
            .bind(IdempotencyStatus::Completed.as_str())
            .bind(response_json)
            .bind(now)
            .bind(id)
            .bind(IdempotencyStatus::InProgress.as_str())
            .bind(file_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn mark_failed(
            &self,
            id: i64,
            error_message: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE idempotency_records SET status = ?, error_message = ?, updated_at = ? WHERE id = ? AND status = ?",
            )
            .bind(IdempotencyStatus::Failed.as_str())
            .bind(error_message)
            .bind(now)
            .bind(id)
            .bind(IdempotencyStatus::InProgress.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn reset_for_retry(&self, id: i64, now: OffsetDateTime) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE idempotency_records SET status = ?, error_message = NULL, updated_at = ? \
                 WHERE id = ? AND status = ? AND file_id IS NULL",
            )
            .bind(IdempotencyStatus::InProgress.as_str())
            .bind(now)
            .bind(id)
            .bind(IdempotencyStatus::Failed.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn attach_file(
            &self,
            id: i64,
            file_id: i64,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE idempotency_records SET file_id = ?, updated_at = ? \
                 WHERE id = ? AND status = ? AND file_id IS NULL",
            )
            .bind(file_id)
            .bind(now)
            .bind(id)
            .bind(IdempotencyStatus::InProgress.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn detach_file(
            &self,
            id: i64,
            file_id: i64,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE idempotency_records SET file_id = NULL, updated_at = ? \
                 WHERE id = ? AND status = ? AND file_id = ?",
            )
            .bind(now)
            .bind(id)
            .bind(IdempotencyStatus::Failed.as_str())
            .bind(file_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn find_failed_with_file(
            &self,
            limit: u32,
        ) -> MetadataResult<Vec<IdempotencyRecordRow>> {
            let rows = sqlx::query_as::<_, IdempotencyRecordRow>(
                r#"
                SELECT * FROM idempotency_records
                WHERE status = ? AND file_id IS NOT NULL
                ORDER BY updated_at ASC, id ASC
                LIMIT ?
                "#,
            )
            .bind(IdempotencyStatus::Failed.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn link_to_saga(
            &self,
            id: i64,
            saga_id: Uuid,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE idempotency_records SET saga_id = ?, updated_at = ? WHERE id = ?",
            )
            .bind(saga_id)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn find_stale(
            &self,
            status: IdempotencyStatus,
            older_than: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<IdempotencyRecordRow>> {
            let rows = sqlx::query_as::<_, IdempotencyRecordRow>(
                r#"
                SELECT * FROM idempotency_records
                WHERE status = ? AND created_at < ? AND updated_at < ?
                ORDER BY created_at ASC, id ASC
                LIMIT ?
                "#,
            )
            .bind(status.as_str())
            .bind(older_than)
            .bind(older_than)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn count_stale(
            &self,
            status: IdempotencyStatus,
            older_than: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM idempotency_records WHERE status = ? AND created_at < ? AND updated_at < ?",
            )
            .bind(status.as_str())
            .bind(older_than)
            .bind(older_than)
            .fetch_one(&self.pool)
            .await?;
            Ok(count as u64)
        }

        async fn delete_older_than(
            &self,
            statuses: &[IdempotencyStatus],
            older_than: OffsetDateTime,
        ) -> MetadataResult<u64> {
            if statuses.is_empty() {
                return Ok(0);
            }

            let placeholders = vec!["?"; statuses.len()].join(", ");
            let sql = format!(
                "DELETE FROM idempotency_records WHERE status IN ({placeholders}) AND created_at < ?"
            );
            let mut query = sqlx::query(&sql);
            for status in statuses {
                query = query.bind(status.as_str());
            }
            let result = query.bind(older_than).execute(&self.pool).await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn insert_file(&self, file: &NewFileRow) -> MetadataResult<FileRow> {
            let result = sqlx::query_as::<_, FileRow>(
                r#"
                INSERT INTO files
                    (user_id, original_filename, stored_filename, content_type,
                     file_size, storage_url, bucket_name, uploaded_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(file.user_id)
            .bind(&file.original_filename)
            .bind(&file.stored_filename)
            .bind(&file.content_type)
            .bind(file.file_size)
            .bind(&file.storage_url)
            .bind(&file.bucket_name)
            .bind(file.uploaded_at)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(row) => Ok(row),
                Err(e) if is_unique_violation(&e) => Err(MetadataError::AlreadyExists(format!(
                    "file with stored name {}",
                    file.stored_filename
                ))),
                Err(e) => Err(e.into()),
            }
        }

        async fn get_file(&self, id: i64) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_file_for_owner(
            &self,
            id: i64,
            owner: OwnerId,
        ) -> MetadataResult<Option<FileRow>> {
            let row =
                sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = ? AND user_id = ?")
                    .bind(id)
                    .bind(owner.get())
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn list_files_for_owner(
            &self,
            owner: OwnerId,
            limit: u32,
            offset: u32,
        ) -> MetadataResult<Vec<FileRow>> {
            let rows = sqlx::query_as::<_, FileRow>(
                r#"
                SELECT * FROM files
                WHERE user_id = ?
                ORDER BY uploaded_at DESC, id DESC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(owner.get())
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn count_files_for_owner(&self, owner: OwnerId) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE user_id = ?")
                .bind(owner.get())
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        }

        async fn delete_file(&self, id: i64) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM files WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() == 1)
        }
    }
}

// No CHECK on `status`: unknown values are reported by `IdempotencyRecordRow::status`.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS idempotency_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    idempotency_key BLOB NOT NULL,
    status TEXT NOT NULL,
    file_id INTEGER,
    response_json TEXT,
    error_message TEXT,
    saga_id BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CONSTRAINT uq_idempotency_user_key UNIQUE (user_id, idempotency_key)
);

CREATE INDEX IF NOT EXISTS idx_idempotency_status_created
    ON idempotency_records (status, created_at);
CREATE INDEX IF NOT EXISTS idx_idempotency_saga
    ON idempotency_records (saga_id);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    original_filename TEXT NOT NULL,
    stored_filename TEXT NOT NULL UNIQUE,
    content_type TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    storage_url TEXT NOT NULL,
    bucket_name TEXT NOT NULL,
    uploaded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_files_user_uploaded
    ON files (user_id, uploaded_at);
"#;

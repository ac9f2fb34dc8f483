//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{FileRepo, IdempotencyRepo};
use crate::store::{MetadataStore, is_unique_violation};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use stowage_core::config::PgSslMode;
use stowage_core::{IdempotencyKey, IdempotencyStatus, OwnerId};
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Connect using a full connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Connect using individual parameters, so the password can come from
    /// the environment instead of a URL in the config file.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{timeout_ms}ms"))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Prepared statements cannot hold more than one command.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl IdempotencyRepo for PostgresStore {
    async fn find_by_owner_and_key(
        &self,
        owner: OwnerId,
        key: IdempotencyKey,
    ) -> MetadataResult<Option<IdempotencyRecordRow>> {
        let row = sqlx::query_as::<_, IdempotencyRecordRow>(
            "SELECT * FROM idempotency_records WHERE user_id = $1 AND idempotency_key = $2",
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
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING *
            "#,
        )
        .bind(owner.get())
        .bind(*key.as_uuid())
        .bind(IdempotencyStatus::InProgress.as_str())
        .bind(saga_id)
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
            SET status = $1, response_json = $2, error_message = NULL, updated_at = $3
            WHERE id = $4 AND status = $5 AND file_id = $6
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
            "UPDATE idempotency_records SET status = $1, error_message = $2, updated_at = $3 WHERE id = $4 AND status = $5",
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
            "UPDATE idempotency_records SET status = $1, error_message = NULL, updated_at = $2 \
             WHERE id = $3 AND status = $4 AND file_id IS NULL",
        )
        .bind(IdempotencyStatus::InProgress.as_str())
        .bind(now)
        .bind(id)
        .bind(IdempotencyStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn attach_file(&self, id: i64, file_id: i64, now: OffsetDateTime) -> MetadataResult<bool> {
        let result = sqlx::query(
            "UPDATE idempotency_records SET file_id = $1, updated_at = $2 \
             WHERE id = $3 AND status = $4 AND file_id IS NULL",
        )
        .bind(file_id)
        .bind(now)
        .bind(id)
        .bind(IdempotencyStatus::InProgress.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn detach_file(&self, id: i64, file_id: i64, now: OffsetDateTime) -> MetadataResult<bool> {
        let result = sqlx::query(
            "UPDATE idempotency_records SET file_id = NULL, updated_at = $1 \
             WHERE id = $2 AND status = $3 AND file_id = $4",
        )
        .bind(now)
        .bind(id)
        .bind(IdempotencyStatus::Failed.as_str())
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_failed_with_file(&self, limit: u32) -> MetadataResult<Vec<IdempotencyRecordRow>> {
        let rows = sqlx::query_as::<_, IdempotencyRecordRow>(
            r#"
            SELECT * FROM idempotency_records
            WHERE status = $1 AND file_id IS NOT NULL
            ORDER BY updated_at ASC, id ASC
            LIMIT $2
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
        let result =
            sqlx::query("UPDATE idempotency_records SET saga_id = $1, updated_at = $2 WHERE id = $3")
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
            WHERE status = $1 AND created_at < $2 AND updated_at < $2
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(status.as_str())
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
            "SELECT COUNT(*) FROM idempotency_records WHERE status = $1 AND created_at < $2 AND updated_at < $2",
        )
        .bind(status.as_str())
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
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let result = sqlx::query(
            "DELETE FROM idempotency_records WHERE status = ANY($1) AND created_at < $2",
        )
        .bind(statuses)
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl FileRepo for PostgresStore {
    async fn insert_file(&self, file: &NewFileRow) -> MetadataResult<FileRow> {
        let result = sqlx::query_as::<_, FileRow>(
            r#"
            INSERT INTO files
                (user_id, original_filename, stored_filename, content_type,
                 file_size, storage_url, bucket_name, uploaded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
        let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_file_for_owner(&self, id: i64, owner: OwnerId) -> MetadataResult<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = $1 AND user_id = $2")
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
            WHERE user_id = $1
            ORDER BY uploaded_at DESC, id DESC
            LIMIT $2 OFFSET $3
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
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE user_id = $1")
            .bind(owner.get())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn delete_file(&self, id: i64) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::postgres_schema_statements;

    #[test]
    fn postgres_schema_statements_skips_empty_and_comment_only() {
        let schema = r#"
            -- comment only

            CREATE TABLE foo (id int);
            ;
            -- another comment
            CREATE TABLE bar (id int);
        "#;

        let statements = postgres_schema_statements(schema);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("CREATE TABLE foo"));
        assert!(statements[1].contains("CREATE TABLE bar"));
    }

    #[test]
    fn embedded_schema_creates_both_tables() {
        let statements = postgres_schema_statements(super::POSTGRES_SCHEMA);
        assert!(
            statements
                .iter()
                .any(|s| s.contains("CREATE TABLE IF NOT EXISTS idempotency_records"))
        );
        assert!(
            statements
                .iter()
                .any(|s| s.contains("CREATE TABLE IF NOT EXISTS files"))
        );
        assert!(
            statements
                .iter()
                .any(|s| s.contains("uq_idempotency_user_key"))
        );
    }
}

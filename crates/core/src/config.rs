//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum accepted request body for uploads, in bytes.
    #[serde(default = "default_max_upload_size_bytes")]
    pub max_upload_size_bytes: u64,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Log output format for the tracing subscriber.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_upload_size_bytes() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_size_bytes: default_max_upload_size_bytes(),
            log_format: LogFormat::default(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_upload_size_bytes == 0 {
            return Err("server.max_upload_size_bytes cannot be 0".to_string());
        }
        if usize::try_from(self.max_upload_size_bytes).is_err() {
            return Err(format!(
                "server.max_upload_size_bytes {} does not fit in memory addressing on this platform",
                self.max_upload_size_bytes
            ));
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
        /// Base URL under which a file server exposes `path`.
        /// Download links fall back to `file://` URLs when unset.
        #[serde(default)]
        public_base_url: Option<String>,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs (e.g., `endpoint/bucket/key` instead of `bucket.endpoint/key`).
        /// Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
            public_base_url: None,
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a non-empty bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem {
                public_base_url: Some(url),
                ..
            } if !(url.starts_with("http://") || url.starts_with("https://")) => Err(format!(
                "filesystem public_base_url must be an http(s) URL, got '{url}'"
            )),
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (testing and single-node deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over individual fields if both are provided.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// WARNING: Prefer STOWAGE_METADATA__PASSWORD env var over storing in config.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds. PostgreSQL cancels queries
        /// that exceed this duration.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("postgres max_connections cannot be 0".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Response cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheConfig {
    /// In-process cache. Lost on restart, not shared between replicas.
    Memory {
        #[serde(default = "default_cache_max_entries")]
        max_entries: usize,
    },
    /// Redis (or compatible) server shared by all replicas.
    Redis {
        /// Connection URL, e.g. `redis://localhost:6379`.
        url: String,
    },
    /// No cache; every decision reads the metadata store.
    None,
}

fn default_cache_max_entries() -> usize {
    100_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::Memory {
            max_entries: default_cache_max_entries(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            CacheConfig::Memory { max_entries: 0 } => {
                Err("cache.max_entries cannot be 0; use type = \"none\" to disable".to_string())
            }
            CacheConfig::Redis { url }
                if !(url.starts_with("redis://")
                    || url.starts_with("rediss://")
                    || url.starts_with("unix://")) =>
            {
                Err(format!("cache.url must be a redis:// URL, got '{url}'"))
            }
            _ => Ok(()),
        }
    }
}

/// Idempotency protocol configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// How long completed responses stay in the response cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Lifetime of generated download links.
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_ttl_secs: u64,
    /// Regenerate the download link when replaying a completed upload.
    /// Off by default so replays are byte-identical to the first response.
    #[serde(default)]
    pub refresh_download_url_on_replay: bool,
}

fn default_cache_ttl_secs() -> u64 {
    86400 // 24 hours
}

fn default_presign_ttl_secs() -> u64 {
    3600 // 1 hour
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            presign_ttl_secs: default_presign_ttl_secs(),
            refresh_download_url_on_replay: false,
        }
    }
}

impl IdempotencyConfig {
    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn presign_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.presign_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.cache_ttl_secs == 0 {
            return Err("idempotency.cache_ttl_secs cannot be 0".to_string());
        }
        // SigV4 presigned URLs are capped at 7 days.
        if self.presign_ttl_secs == 0 || self.presign_ttl_secs > 7 * 86400 {
            return Err(format!(
                "idempotency.presign_ttl_secs must be between 1 and {}, got {}",
                7 * 86400,
                self.presign_ttl_secs
            ));
        }
        Ok(())
    }
}

/// Background reaper configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Age after which an in-progress record is considered abandoned.
    #[serde(default = "default_stale_timeout_secs")]
    pub stale_timeout_secs: u64,
    /// Interval between stale operation sweeps.
    #[serde(default = "default_stale_interval_secs")]
    pub stale_interval_secs: u64,
    /// Maximum records handled by one stale sweep.
    #[serde(default = "default_stale_batch_size")]
    pub stale_batch_size: u32,
    /// Terminal records older than this many days are deleted.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Interval between retention sweeps.
    #[serde(default = "default_retention_interval_secs")]
    pub retention_interval_secs: u64,
    /// Run both reapers on their timers. Manual sweeps work either way.
    #[serde(default = "default_auto_schedule_enabled")]
    pub auto_schedule_enabled: bool,
}

fn default_stale_timeout_secs() -> u64 {
    300 // 5 minutes
}

fn default_stale_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_stale_batch_size() -> u32 {
    100
}

fn default_retention_days() -> u32 {
    30
}

fn default_retention_interval_secs() -> u64 {
    86400 // daily
}

fn default_auto_schedule_enabled() -> bool {
    true
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            stale_timeout_secs: default_stale_timeout_secs(),
            stale_interval_secs: default_stale_interval_secs(),
            stale_batch_size: default_stale_batch_size(),
            retention_days: default_retention_days(),
            retention_interval_secs: default_retention_interval_secs(),
            auto_schedule_enabled: default_auto_schedule_enabled(),
        }
    }
}

impl CleanupConfig {
    /// Get the stale timeout as a Duration.
    pub fn stale_timeout(&self) -> Duration {
        let secs = i64::try_from(self.stale_timeout_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Get the retention window as a Duration.
    pub fn retention(&self) -> Duration {
        Duration::days(i64::from(self.retention_days))
    }

    pub fn stale_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stale_interval_secs)
    }

    pub fn retention_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.retention_interval_secs)
    }

    /// Validate cleanup configuration for dangerous settings.
    pub fn validate(&self) -> Result<(), String> {
        // tokio::time::interval panics on a zero period
        if self.stale_interval_secs == 0 {
            return Err("cleanup.stale_interval_secs cannot be 0".to_string());
        }
        if self.retention_interval_secs == 0 {
            return Err("cleanup.retention_interval_secs cannot be 0".to_string());
        }
        if self.stale_timeout_secs == 0 {
            return Err(
                "cleanup.stale_timeout_secs cannot be 0 (every in-flight upload would be reaped)"
                    .to_string(),
            );
        }
        if self.stale_timeout_secs > i64::MAX as u64 {
            return Err(format!(
                "cleanup.stale_timeout_secs {} exceeds maximum value {}",
                self.stale_timeout_secs,
                i64::MAX
            ));
        }
        if self.stale_batch_size == 0 {
            return Err("cleanup.stale_batch_size cannot be 0".to_string());
        }
        if self.retention_days == 0 {
            return Err("cleanup.retention_days cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata, an
    /// in-memory cache, and no background scheduling.
    pub fn for_testing() -> Self {
        Self {
            cleanup: CleanupConfig {
                auto_schedule_enabled: false,
                ..CleanupConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate every section, returning the first error.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.storage.validate()?;
        self.metadata.validate()?;
        self.cache.validate()?;
        self.idempotency.validate()?;
        self.cleanup.validate()?;
        Ok(())
    }
}

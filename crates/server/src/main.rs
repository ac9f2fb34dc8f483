//! Stowage server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::path::Path;
use stowage_core::config::{AppConfig, LogFormat};
use stowage_server::{AppState, create_router};
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Stowage - idempotent file upload service
#[derive(Parser, Debug)]
#[command(name = "stowaged")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "STOWAGE_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from an optional TOML file overlaid with `STOWAGE_`
/// environment variables (`__` separates nested keys).
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if Path::new(path).exists() {
        figment = figment.merge(Toml::file(path));
    }
    figment
        .merge(Env::prefixed("STOWAGE_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .context("failed to load configuration")
}

fn init_tracing(format: LogFormat) {
    let fmt_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logging depends on the configured format, so load config first.
    let config = load_config(&args.config)?;
    init_tracing(config.server.log_format);

    tracing::info!("Stowage v{}", env!("CARGO_PKG_VERSION"));
    if Path::new(&args.config).exists() {
        tracing::info!(config_path = %args.config, "Loaded configuration from file");
    } else {
        tracing::info!(
            config_path = %args.config,
            "No config file found; using defaults and environment variables"
        );
    }

    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    stowage_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = stowage_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    // Fail fast rather than report healthy with unreachable storage.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend ready");

    let metadata = stowage_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!(backend = metadata.backend_name(), "Metadata store ready");

    let cache = stowage_cache::from_config(&config.cache)
        .await
        .context("failed to initialize response cache")?;
    tracing::info!(backend = cache.backend_name(), "Response cache ready");

    let state = AppState::new(config.clone(), storage, metadata, cache);

    if config.cleanup.auto_schedule_enabled {
        let _reaper_handles = state.reaper.clone().spawn_schedulers();
        tracing::info!(
            stale_interval_secs = config.cleanup.stale_interval_secs,
            retention_interval_secs = config.cleanup.retention_interval_secs,
            "Cleanup reapers scheduled"
        );
    } else {
        tracing::info!("Automatic cleanup scheduling disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

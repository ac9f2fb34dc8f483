//! Prometheus metrics for the Stowage server.
//!
//! Exposes upload outcomes, idempotency decisions, cache health, and reaper
//! activity.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Labels never carry owner ids, keys, or filenames, but the endpoint still
//! exposes aggregate traffic and should be network-restricted to scrapers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload metrics
pub static UPLOADS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stowage_uploads_total",
            "Upload requests by outcome (success, failure, abandoned, replay, conflict)",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static UPLOAD_BYTES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_upload_bytes_total",
        "Total bytes written to the object store by successful uploads",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "stowage_upload_duration_seconds",
            "Time from proceed decision to completed upload",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
    )
    .expect("metric creation failed")
});

// Idempotency metrics
pub static IDEMPOTENCY_DECISIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stowage_idempotency_decisions_total",
            "Idempotency decisions by result",
        ),
        &["decision"],
    )
    .expect("metric creation failed")
});

pub static CACHE_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_cache_errors_total",
        "Response cache operations that failed and were treated as misses",
    )
    .expect("metric creation failed")
});

// Reaper metrics
pub static REAPER_RECORDS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stowage_reaper_records_total",
            "Records processed by the cleanup reapers",
        ),
        &["reaper", "result"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_BYTES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(IDEMPOTENCY_DECISIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REAPER_RECORDS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Helper to record an upload request outcome.
pub fn record_upload_outcome(outcome: &str) {
    UPLOADS.with_label_values(&[outcome]).inc();
}

/// Helper to record reaper results.
pub fn record_reaper(reaper: &str, result: &str, count: u64) {
    if count > 0 {
        REAPER_RECORDS
            .with_label_values(&[reaper, result])
            .inc_by(count);
    }
}

//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let upload_routes = Router::new()
        .route("/files/upload", post(handlers::upload_file))
        .layer(DefaultBodyLimit::max(state.upload_body_limit()));

    let file_routes = Router::new()
        .route("/files", get(handlers::list_files))
        .route(
            "/files/{id}",
            get(handlers::get_file_info).delete(handlers::delete_file),
        )
        .route("/files/{id}/download", get(handlers::get_download_url));

    let admin_routes = Router::new()
        .route("/admin/cleanup/stale", post(handlers::run_stale_cleanup))
        .route(
            "/admin/cleanup/stale/count",
            get(handlers::count_stale_operations),
        )
        .route(
            "/admin/cleanup/retention",
            post(handlers::run_retention_cleanup),
        );

    let mut router = Router::new()
        // Health check (unauthenticated for load balancers and k8s checks)
        .route("/health", get(handlers::health_check))
        .merge(upload_routes)
        .merge(file_routes)
        .merge(admin_routes);

    // SECURITY: when enabled, restrict /metrics to the scrapers' network.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

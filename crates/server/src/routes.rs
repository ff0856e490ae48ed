//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, head, options, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let chunk_limit = usize::try_from(state.config.server.max_chunk_size).unwrap_or(usize::MAX);

    // tus protocol
    let tus_routes = Router::new()
        .route(
            "/v1/files",
            options(handlers::options_files).post(handlers::create_file),
        )
        .route(
            "/v1/files/{upload_key}",
            head(handlers::head_file)
                .patch(handlers::patch_file)
                .layer(DefaultBodyLimit::max(chunk_limit)),
        )
        .layer(middleware::map_response(handlers::tus_resumable));

    let api_routes = Router::new()
        // Health check (unauthenticated for load balancers/k8s probes)
        .route("/v1/health", get(handlers::health_check))
        // Completion
        .route("/v1/uploads/{upload_key}", get(handlers::get_upload))
        .route(
            "/v1/uploads/{upload_key}/complete",
            post(handlers::complete_upload),
        );

    let mut router = Router::new().merge(tus_routes).merge(api_routes);

    // Must be network-restricted to the Prometheus scraper when enabled.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

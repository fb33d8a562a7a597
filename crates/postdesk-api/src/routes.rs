//! API routes.

use axum::middleware;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::videos::{
    claim_video, count_candidates, count_claimed, create_video, delete_video, get_video,
    list_candidates, list_claimed, update_video,
};
use crate::handlers::{health, ready};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    RateLimiterCache,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let video_routes = Router::new()
        .route(
            "/videos",
            get(get_video)
                .post(create_video)
                .put(update_video)
                .delete(delete_video),
        )
        .route("/videos/claim", get(claim_video))
        .route("/videos/candidates", get(list_candidates))
        .route("/videos/candidates/count", get(count_candidates))
        .route("/videos/claimed", get(list_claimed))
        .route("/videos/claimed/count", get(count_claimed));

    let rate_limiter = std::sync::Arc::new(RateLimiterCache::new(state.config.rate_limit_rps));

    let api_routes = video_routes.layer(middleware::from_fn_with_state(
        rate_limiter,
        rate_limit_middleware,
    ));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .merge(api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(
            ServiceBuilder::new()
                .layer(cors_layer(&state.config.cors_origins))
                .layer(middleware::from_fn(request_logging))
                .layer(middleware::from_fn(request_id))
                .layer(middleware::from_fn(security_headers))
                .layer(middleware::from_fn(metrics_middleware))
                .layer(RequestBodyLimitLayer::new(state.config.max_body_size)),
        )
        .with_state(state)
}

//! API routes.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::handlers::jobs::{cancel_job, get_artifact, get_status, get_subtitle_artifact};
use crate::handlers::sites::list_sites;
use crate::handlers::submit::{submit_download, submit_info, submit_subtitles};
use crate::handlers::{health, ready};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let video_routes = Router::new()
        .route("/videos/info", post(submit_info))
        .route("/videos/download", post(submit_download))
        .route("/videos/subtitles", post(submit_subtitles));

    let job_routes = Router::new()
        .route("/jobs/:job_id/status", get(get_status))
        .route("/jobs/:job_id/artifact", get(get_artifact))
        .route("/jobs/:job_id", delete(cancel_job))
        .route("/subtitles/:job_id/artifact", get(get_subtitle_artifact));

    let api_routes = Router::new()
        .merge(video_routes)
        .merge(job_routes)
        .route("/sites", get(list_sites))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.limiter),
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
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

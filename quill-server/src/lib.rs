//! HTTP service hosting the access-log pipeline.

pub mod middleware;
pub mod routes;

use axum::Router;
use axum::routing::{get, post};
use quill_observability::PipelineMetrics;
use quill_pipeline::AccessLog;
use std::sync::Arc;

/// Shared state for handlers and the access-log middleware.
#[derive(Clone)]
pub struct AppState {
    pub access_log: Arc<AccessLog>,
    pub metrics: Arc<PipelineMetrics>,
}

/// Build the router with every route wrapped by the access-log middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/echo", post(routes::echo))
        .route("/users/{id}", get(routes::get_user))
        .route("/metrics", get(routes::metrics))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::access_log,
        ))
        .with_state(state)
}

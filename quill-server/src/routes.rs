use axum::Json;
use axum::extract::{Path, State};
use bytes::Bytes;
use serde_json::{Value, json};

use crate::AppState;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn echo(body: Bytes) -> Bytes {
    body
}

pub async fn get_user(Path(id): Path<String>) -> Json<Value> {
    Json(json!({ "id": id, "name": format!("user-{id}") }))
}

/// Prometheus text exposition; empty when metrics are disabled.
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}

use std::sync::Arc;

use shuttle_axum::axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::ingest::scheduler::{JobRunner, TriggerOrigin, TriggerOutcome};

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<JobRunner>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/{source}", get(read_source))
        .route("/api/{source}/update", post(trigger_update))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// `"Shinhan-Cards"` → `"shinhan"`; `"kb-card"` → `"kb"`.
pub fn canonical_source(raw: &str) -> String {
    let lower = raw.trim().to_ascii_lowercase();
    lower
        .strip_suffix("-cards")
        .or_else(|| lower.strip_suffix("-card"))
        .unwrap_or(&lower)
        .to_string()
}

fn unknown(source: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "unknown source", "source": source })),
    )
        .into_response()
}

async fn read_source(State(state): State<AppState>, Path(raw): Path<String>) -> Response {
    let source = canonical_source(&raw);
    match state.runner.job(&source) {
        Some(job) => Json(job.read_json().await).into_response(),
        None => unknown(&source),
    }
}

async fn trigger_update(State(state): State<AppState>, Path(raw): Path<String>) -> Response {
    let source = canonical_source(&raw);
    match state.runner.trigger(&source, TriggerOrigin::Manual) {
        // The run proceeds detached; its outcome only reaches the logs.
        TriggerOutcome::Started(_) | TriggerOutcome::AlreadyRunning => {
            info!(target: "api", source = %source, "manual update accepted");
            Json(json!({ "status": "started" })).into_response()
        }
        TriggerOutcome::UnknownSource => unknown(&source),
    }
}

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json};
use serde_json::json;

use crate::error::ServerResult;
use crate::router::AppState;

/// Prometheus text exposition format, version 0.0.4.
const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// Every registered family in text exposition format.
pub async fn metrics_handler(State(state): State<AppState>) -> ServerResult<impl IntoResponse> {
    let body = state.registry.gather_text()?;
    Ok(([(header::CONTENT_TYPE, TEXT_FORMAT)], body))
}

pub async fn health_handler() -> &'static str {
    "ok"
}

/// Ready once the ring has a member; before that nothing is owned.
pub async fn ready_handler(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.ring.member_count() > 0 {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "ring has no members")
    }
}

pub async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.ring.status();
    let members: Vec<String> = state
        .ring
        .members()
        .iter()
        .map(|m| m.to_string())
        .collect();
    let kinds: Vec<&str> = state.kinds.iter().map(|k| k.as_str()).collect();
    Json(json!({
        "name": "tally",
        "version": env!("CARGO_PKG_VERSION"),
        "self_address": state.ring.self_address().as_str(),
        "ring_generation": status.generation,
        "members": members,
        "kinds": kinds,
    }))
}

//! Read-only health surface on its own listener.

use crate::state::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "agent_command": state.agent_command,
        "live_sessions": state.registry.live_count().await,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

async fn healthz() -> &'static str {
    "ok"
}

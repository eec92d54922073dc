//! Health Check API Handler

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::api::AppState;

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "observers": state.registry.len(),
        "banned_terms": state.gate.index().len(),
        "embedder": state.gate.embedder_name(),
    }))
}

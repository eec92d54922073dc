//! Safety API Handlers

use axum::{Json, extract::State, http::StatusCode};
use sourcer_core::domain::safety::{BannedTerm, SafetyDecision};
use sourcer_core::dto::safety::CheckTerm;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::safety_service;

/// POST /safety/check
/// Check one term against the banned-term index
pub async fn check_term(
    State(state): State<AppState>,
    Json(req): Json<CheckTerm>,
) -> ApiResult<Json<SafetyDecision>> {
    tracing::debug!("Checking term: {}", req.term);
    Ok(Json(safety_service::check_term(&state.gate, req).await?))
}

/// GET /safety/terms
pub async fn list_terms(State(state): State<AppState>) -> ApiResult<Json<Vec<BannedTerm>>> {
    Ok(Json(safety_service::list_terms(&state.pool).await?))
}

/// POST /safety/terms
/// Add or update a banned term; it takes effect immediately on this node
pub async fn add_term(
    State(state): State<AppState>,
    Json(term): Json<BannedTerm>,
) -> ApiResult<(StatusCode, Json<BannedTerm>)> {
    let stored = safety_service::add_term(&state.pool, &state.gate, term).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

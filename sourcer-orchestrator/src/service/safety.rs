//! Safety Service
//!
//! Standalone term checks and banned-term administration. New terms are
//! written to the database first, then added to the live index.

use sourcer_core::domain::safety::{BannedTerm, SafetyDecision};
use sourcer_core::dto::safety::CheckTerm;
use sourcer_engine::safety::{EmbedError, SafetyGate};
use sqlx::PgPool;

use crate::repository::banned_term_repository;

/// Longest accepted term, in characters
const MAX_TERM_CHARS: usize = 200;

#[derive(Debug)]
pub enum SafetyError {
    ValidationError(String),
    EmbeddingError(EmbedError),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for SafetyError {
    fn from(err: sqlx::Error) -> Self {
        SafetyError::DatabaseError(err)
    }
}

impl From<EmbedError> for SafetyError {
    fn from(err: EmbedError) -> Self {
        SafetyError::EmbeddingError(err)
    }
}

pub async fn check_term(gate: &SafetyGate, req: CheckTerm) -> Result<SafetyDecision, SafetyError> {
    let term = validate_term(&req.term)?;
    let threshold = match req.threshold {
        Some(t) if !(0.0..=1.0).contains(&t) => {
            return Err(SafetyError::ValidationError(
                "threshold must be within [0, 1]".to_string(),
            ));
        }
        Some(t) => t,
        None => gate.threshold(),
    };

    Ok(gate.check_with_threshold(term, threshold).await?)
}

pub async fn list_terms(pool: &PgPool) -> Result<Vec<BannedTerm>, SafetyError> {
    Ok(banned_term_repository::list_all(pool).await?)
}

pub async fn add_term(
    pool: &PgPool,
    gate: &SafetyGate,
    term: BannedTerm,
) -> Result<BannedTerm, SafetyError> {
    let text = validate_term(&term.term)?.to_string();
    if term.category.trim().is_empty() {
        return Err(SafetyError::ValidationError("category cannot be empty".to_string()));
    }

    let stored = banned_term_repository::upsert(
        pool,
        &BannedTerm::new(text, term.reason.trim(), term.category.trim()),
    )
    .await?;
    gate.add_term(stored.clone()).await?;

    tracing::info!(term = %stored.term, category = %stored.category, "Banned term added");
    Ok(stored)
}

/// Loads every stored term into the gate's index
pub async fn load_index(pool: &PgPool, gate: &SafetyGate) -> Result<usize, SafetyError> {
    let terms = banned_term_repository::list_all(pool).await?;
    Ok(gate.load(terms).await?)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_term(term: &str) -> Result<&str, SafetyError> {
    let term = term.trim();
    if term.is_empty() {
        return Err(SafetyError::ValidationError("term cannot be empty".to_string()));
    }
    if term.chars().count() > MAX_TERM_CHARS {
        return Err(SafetyError::ValidationError(format!(
            "term exceeds {} characters",
            MAX_TERM_CHARS
        )));
    }
    Ok(term)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sourcer_core::domain::safety::default_banned_terms;
    use sourcer_engine::safety::NgramEmbedder;
    use std::sync::Arc;

    async fn gate() -> SafetyGate {
        let gate = SafetyGate::new(Arc::new(NgramEmbedder::default()), 0.8);
        gate.load(default_banned_terms()).await.unwrap();
        gate
    }

    #[test]
    fn test_validate_term() {
        assert_eq!(validate_term("  다이소 ").unwrap(), "다이소");
        assert!(validate_term("   ").is_err());
        assert!(validate_term(&"x".repeat(MAX_TERM_CHARS + 1)).is_err());
    }

    #[tokio::test]
    async fn test_check_term_uses_configured_threshold() {
        let gate = gate().await;
        let decision = check_term(
            &gate,
            CheckTerm {
                term: "마약".to_string(),
                threshold: None,
            },
        )
        .await
        .unwrap();
        assert!(!decision.is_safe);
        assert_eq!(decision.matched_term.as_deref(), Some("마약"));
    }

    #[tokio::test]
    async fn test_check_term_rejects_bad_threshold() {
        let gate = gate().await;
        let result = check_term(
            &gate,
            CheckTerm {
                term: "x".to_string(),
                threshold: Some(2.0),
            },
        )
        .await;
        assert!(matches!(result, Err(SafetyError::ValidationError(_))));
    }
}

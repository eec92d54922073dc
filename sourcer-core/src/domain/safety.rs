//! Safety domain types

use serde::{Deserialize, Serialize};

/// Outcome of checking a candidate term against the banned-term index
///
/// A negative decision is data, not an error: it travels downstream with the
/// stage output and callers decide how to react.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyDecision {
    pub term: String,
    pub is_safe: bool,
    /// Cosine similarity to the nearest banned term, always in [0, 1]
    pub similarity_score: f32,
    pub matched_term: Option<String>,
    pub reason: Option<String>,
}

/// A disallowed reference term with its metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannedTerm {
    pub term: String,
    pub reason: String,
    pub category: String,
}

impl BannedTerm {
    pub fn new(
        term: impl Into<String>,
        reason: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            term: term.into(),
            reason: reason.into(),
            category: category.into(),
        }
    }
}

/// Seed list installed into an empty banned-term store
///
/// Marketplace private-label brands, global trademarks, platform-prohibited
/// wording and superlatives that need substantiation.
pub fn default_banned_terms() -> Vec<BannedTerm> {
    vec![
        BannedTerm::new("코멧", "Coupang private-label trademark", "brand"),
        BannedTerm::new("탐사", "Coupang private-label trademark", "brand"),
        BannedTerm::new("곰곰", "Coupang private-label trademark", "brand"),
        BannedTerm::new("나이키", "Global sportswear trademark", "brand"),
        BannedTerm::new("아디다스", "Global sportswear trademark", "brand"),
        BannedTerm::new("삼성", "Conglomerate trademark", "brand"),
        BannedTerm::new("LG", "Conglomerate trademark", "brand"),
        BannedTerm::new("다이소", "Retailer trademark", "brand"),
        BannedTerm::new("마약", "Platform-prohibited keyword (exaggerated advertising)", "prohibited"),
        BannedTerm::new("최고", "Superlative without objective evidence", "warning"),
    ]
}

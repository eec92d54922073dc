use sourcer_core::domain::safety::{BannedTerm, SafetyDecision};
use std::sync::Arc;

use super::embed::{EmbedError, Embedder};
use super::index::{BannedTermIndex, IndexedTerm, nearest};

/// Nearest-neighbour check of candidate terms against the banned-term index
///
/// Scores above the threshold are unsafe. The threshold is fixed at
/// construction; `check_with_threshold` overrides it per call.
pub struct SafetyGate {
    index: BannedTermIndex,
    embedder: Arc<dyn Embedder>,
    threshold: f32,
}

impl SafetyGate {
    pub fn new(embedder: Arc<dyn Embedder>, threshold: f32) -> Self {
        Self {
            index: BannedTermIndex::new(),
            embedder,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn index(&self) -> &BannedTermIndex {
        &self.index
    }

    pub fn embedder_name(&self) -> &str {
        self.embedder.name()
    }

    /// Embeds `terms` and swaps them in as the whole index
    ///
    /// The previous index stays in service until every term is embedded.
    pub async fn load(&self, terms: Vec<BannedTerm>) -> Result<usize, EmbedError> {
        let mut entries = Vec::with_capacity(terms.len());
        for term in terms {
            let vector = self.embedder.embed(&term.term).await?;
            entries.push(IndexedTerm { term, vector });
        }
        let count = entries.len();
        self.index.replace(entries);
        tracing::info!(count, embedder = self.embedder.name(), "Banned-term index loaded");
        Ok(count)
    }

    pub async fn add_term(&self, term: BannedTerm) -> Result<(), EmbedError> {
        let vector = self.embedder.embed(&term.term).await?;
        tracing::debug!(term = %term.term, category = %term.category, "Banned term indexed");
        self.index.insert(IndexedTerm { term, vector });
        Ok(())
    }

    pub async fn check(&self, term: &str) -> Result<SafetyDecision, EmbedError> {
        self.check_with_threshold(term, self.threshold).await
    }

    pub async fn check_with_threshold(
        &self,
        term: &str,
        threshold: f32,
    ) -> Result<SafetyDecision, EmbedError> {
        let entries = self.index.snapshot();
        if entries.is_empty() {
            return Ok(SafetyDecision {
                term: term.to_string(),
                is_safe: true,
                similarity_score: 0.0,
                matched_term: None,
                reason: Some("No match found".to_string()),
            });
        }

        let query = self.embedder.embed(term).await?;
        let closest = nearest(&entries, &query).map_err(|m| {
            tracing::warn!(
                embedder = self.embedder.name(),
                expected = m.expected,
                found = m.found,
                "Embedding does not match the banned-term index, reload the index"
            );
            EmbedError::DimensionMismatch {
                expected: m.expected,
                found: m.found,
            }
        })?;
        let decision = match closest {
            Some((entry, score)) if score > threshold => SafetyDecision {
                term: term.to_string(),
                is_safe: false,
                similarity_score: score,
                matched_term: Some(entry.term.term.clone()),
                reason: Some(entry.term.reason.clone()),
            },
            Some((_, score)) => SafetyDecision {
                term: term.to_string(),
                is_safe: true,
                similarity_score: score,
                matched_term: None,
                reason: Some("Low similarity".to_string()),
            },
            None => SafetyDecision {
                term: term.to_string(),
                is_safe: true,
                similarity_score: 0.0,
                matched_term: None,
                reason: Some("No match found".to_string()),
            },
        };

        if !decision.is_safe {
            tracing::info!(
                term = %decision.term,
                matched = ?decision.matched_term,
                score = decision.similarity_score,
                "Term rejected by safety gate"
            );
        }
        Ok(decision)
    }
}

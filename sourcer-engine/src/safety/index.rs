//! Banned-term index
//!
//! Read-mostly and copy-on-write: readers take an `Arc` snapshot and search
//! it without holding the lock, writers build a new vector and swap it in.

use sourcer_core::domain::safety::BannedTerm;
use std::sync::{Arc, RwLock};

/// A banned term with its embedding
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedTerm {
    pub term: BannedTerm,
    pub vector: Vec<f32>,
}

#[derive(Debug, Default)]
pub struct BannedTermIndex {
    entries: RwLock<Arc<Vec<IndexedTerm>>>,
}

impl BannedTermIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<Vec<IndexedTerm>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Adds a term, replacing any entry with the same text in place
    pub fn insert(&self, entry: IndexedTerm) {
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut next: Vec<IndexedTerm> = guard.as_ref().clone();
        match next.iter_mut().find(|e| e.term.term == entry.term.term) {
            Some(existing) => *existing = entry,
            None => next.push(entry),
        }
        *guard = Arc::new(next);
    }

    pub fn replace(&self, entries: Vec<IndexedTerm>) {
        *self.entries.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(entries);
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

/// Query and index vectors come from different embedding models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionMismatch {
    pub expected: usize,
    pub found: usize,
}

/// Nearest entry by cosine similarity, clamped to [0, 1]
///
/// Ties keep the earliest entry. Fails on the first entry whose vector
/// length differs from the query's.
pub fn nearest<'a>(
    entries: &'a [IndexedTerm],
    query: &[f32],
) -> Result<Option<(&'a IndexedTerm, f32)>, DimensionMismatch> {
    let mut best: Option<(&IndexedTerm, f32)> = None;
    for entry in entries {
        if entry.vector.len() != query.len() {
            return Err(DimensionMismatch {
                expected: entry.vector.len(),
                found: query.len(),
            });
        }
        let score = cosine_similarity(query, &entry.vector).clamp(0.0, 1.0);
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((entry, score)),
        }
    }
    Ok(best)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: &str, vector: Vec<f32>) -> IndexedTerm {
        IndexedTerm {
            term: BannedTerm::new(term, "reason", "brand"),
            vector,
        }
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_nearest_clamps_negative_scores() {
        let entries = vec![entry("a", vec![-1.0, 0.0])];
        let (_, score) = nearest(&entries, &[1.0, 0.0]).unwrap().unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_nearest_tie_keeps_first() {
        let entries = vec![entry("first", vec![1.0, 0.0]), entry("second", vec![1.0, 0.0])];
        let (found, _) = nearest(&entries, &[1.0, 0.0]).unwrap().unwrap();
        assert_eq!(found.term.term, "first");
    }

    #[test]
    fn test_nearest_on_empty() {
        assert!(nearest(&[], &[1.0]).unwrap().is_none());
    }

    #[test]
    fn test_nearest_rejects_other_dimensions() {
        let entries = vec![entry("a", vec![1.0, 0.0, 0.0])];
        assert_eq!(
            nearest(&entries, &[1.0, 0.0]),
            Err(DimensionMismatch { expected: 3, found: 2 })
        );
    }

    #[test]
    fn test_snapshot_is_unaffected_by_writes() {
        let index = BannedTermIndex::new();
        index.insert(entry("a", vec![1.0]));
        let before = index.snapshot();

        index.insert(entry("b", vec![1.0]));
        assert_eq!(before.len(), 1);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_insert_replaces_same_term() {
        let index = BannedTermIndex::new();
        index.insert(entry("a", vec![1.0, 0.0]));
        index.insert(entry("a", vec![0.0, 1.0]));
        assert_eq!(index.len(), 1);
        assert_eq!(index.snapshot()[0].vector, vec![0.0, 1.0]);
    }

    #[test]
    fn test_replace_swaps_everything() {
        let index = BannedTermIndex::new();
        index.insert(entry("a", vec![1.0]));
        index.replace(vec![]);
        assert!(index.is_empty());
    }
}

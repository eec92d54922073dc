//! Semantic safety gate
//!
//! Candidate terms are embedded and compared against an index of banned
//! reference terms. A term whose nearest neighbour is closer than the
//! configured threshold is flagged unsafe.

mod candidates;
mod embed;
mod gate;
mod index;

pub use candidates::candidate_terms;
pub use embed::{EmbedError, Embedder, EmbedderConfig, NgramEmbedder, OllamaEmbedder};
pub use gate::SafetyGate;
pub use index::{BannedTermIndex, IndexedTerm, cosine_similarity};

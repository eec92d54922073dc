//! Safety DTOs

use serde::{Deserialize, Serialize};

/// Standalone safety check request
///
/// `threshold` overrides the deployment's configured threshold for this call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckTerm {
    pub term: String,
    #[serde(default)]
    pub threshold: Option<f32>,
}

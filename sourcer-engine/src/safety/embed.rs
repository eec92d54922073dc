//! Text embedders
//!
//! The index and the gate must share one embedder: vectors from different
//! embedders are not comparable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("embedding service returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("embedding response had no vector")]
    EmptyResponse,

    #[error("embedding has {found} dimensions but the banned-term index has {expected}")]
    DimensionMismatch { expected: usize, found: usize },
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    fn name(&self) -> &str;
}

/// Hashed character n-gram embedder
///
/// Deterministic and local: each 1..=3 character gram of the lowercased text
/// is hashed (FNV-1a) into one of `dims` buckets, then the vector is
/// L2-normalised. Identical strings score 1.0; strings sharing no grams
/// score near 0.
#[derive(Debug, Clone)]
pub struct NgramEmbedder {
    dims: usize,
    max_gram: usize,
}

impl NgramEmbedder {
    pub const DEFAULT_DIMS: usize = 512;

    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            max_gram: 3,
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        let normalized: Vec<char> = text
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        for n in 1..=self.max_gram {
            for gram in normalized.windows(n) {
                let bucket = (fnv1a(gram) % self.dims as u64) as usize;
                // Longer grams carry more identity than single characters
                vector[bucket] += n as f32;
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for NgramEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMS)
    }
}

fn fnv1a(chars: &[char]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut buf = [0u8; 4];
    for c in chars {
        for byte in c.encode_utf8(&mut buf).bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
    }
    hash
}

#[async_trait]
impl Embedder for NgramEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.embed_sync(text))
    }

    fn name(&self) -> &str {
        "ngram"
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedder backed by an Ollama server's `/api/embed`
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&EmbedRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbedResponse = response.json().await?;
        parsed
            .embeddings
            .into_iter()
            .next()
            .ok_or(EmbedError::EmptyResponse)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Embedder selection read from the environment
///
/// - `EMBEDDER`: `ngram` (default) or `ollama`
/// - `OLLAMA_URL`: default `http://localhost:11434`
/// - `EMBEDDING_MODEL`: default `nomic-embed-text`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedderConfig {
    Ngram,
    Ollama { url: String, model: String },
}

impl EmbedderConfig {
    pub fn from_env() -> Result<Self, String> {
        let kind = std::env::var("EMBEDDER").unwrap_or_else(|_| "ngram".to_string());
        match kind.to_lowercase().as_str() {
            "ngram" => Ok(EmbedderConfig::Ngram),
            "ollama" => {
                let url = std::env::var("OLLAMA_URL")
                    .unwrap_or_else(|_| "http://localhost:11434".to_string());
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(format!("OLLAMA_URL must start with http:// or https://, got {}", url));
                }
                let model = std::env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "nomic-embed-text".to_string());
                Ok(EmbedderConfig::Ollama { url, model })
            }
            other => Err(format!("unknown EMBEDDER '{}', expected ngram or ollama", other)),
        }
    }

    pub fn build(&self) -> Arc<dyn Embedder> {
        match self {
            EmbedderConfig::Ngram => Arc::new(NgramEmbedder::default()),
            EmbedderConfig::Ollama { url, model } => Arc::new(OllamaEmbedder::new(url, model)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::cosine_similarity;

    #[test]
    fn test_ngram_is_deterministic() {
        let embedder = NgramEmbedder::default();
        assert_eq!(embedder.embed_sync("나이키"), embedder.embed_sync("나이키"));
    }

    #[test]
    fn test_ngram_is_normalised() {
        let vector = NgramEmbedder::default().embed_sync("wireless earbuds");
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_ngram_ignores_case_and_spacing() {
        let embedder = NgramEmbedder::default();
        let a = embedder.embed_sync("Phone Case");
        let b = embedder.embed_sync("phonecase");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_ngram_related_terms_are_closer() {
        let embedder = NgramEmbedder::default();
        let base = embedder.embed_sync("삼성");
        let related = embedder.embed_sync("삼성전자");
        let unrelated = embedder.embed_sync("wireless earbuds");
        assert!(cosine_similarity(&base, &related) > cosine_similarity(&base, &unrelated));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let vector = NgramEmbedder::new(8).embed_sync("   ");
        assert!(vector.iter().all(|x| *x == 0.0));
    }
}

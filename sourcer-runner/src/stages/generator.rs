//! Text generation backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::GeneratorConfig;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("generation service returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("generation service returned an empty response")]
    EmptyResponse,
}

/// A rendered prompt for one stage
#[derive(Debug, Clone)]
pub struct Prompt {
    pub stage: String,
    pub query: String,
    pub text: String,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError>;

    fn name(&self) -> &str;
}

pub fn build(config: &GeneratorConfig) -> Arc<dyn TextGenerator> {
    match config {
        GeneratorConfig::Mock => Arc::new(MockGenerator),
        GeneratorConfig::Ollama {
            url,
            model,
            temperature,
        } => Arc::new(OllamaGenerator::new(url, model, *temperature)),
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Generator backed by an Ollama server's `/api/generate`
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OllamaGenerator {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, temperature: f32) -> Self {
        // Long generations are normal; the lease heartbeat keeps the run alive meanwhile
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature,
        }
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        tracing::debug!(stage = %prompt.stage, model = %self.model, "Requesting generation");
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&GenerateRequest {
                model: &self.model,
                prompt: &prompt.text,
                stream: false,
                options: GenerateOptions {
                    temperature: self.temperature,
                },
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        if parsed.response.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(parsed.response)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Deterministic canned output for development and tests
///
/// Each known stage answers with a short lead-in followed by a fenced JSON
/// block, the way chat models tend to.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockGenerator;

impl MockGenerator {
    fn canned(stage: &str, query: &str) -> Option<serde_json::Value> {
        let value = match stage {
            "sourcing" => json!({
                "query": query,
                "products": [
                    {"name": format!("{} basic", query), "price_krw": 19900, "monthly_searches": 12000},
                    {"name": format!("{} premium", query), "price_krw": 49900, "monthly_searches": 4300},
                ],
                "summary": format!("Steady demand for {} with room in the mid price band", query),
            }),
            "competitor_analysis" => json!({
                "competitors": [
                    {"name": "Store A", "rating": 4.2, "weakness": "slow shipping"},
                    {"name": "Store B", "rating": 3.9, "weakness": "thin product detail page"},
                ],
                "gaps": ["bundle offers", "detailed size guide"],
            }),
            "keyword_verification" => json!({
                "keywords": [
                    query,
                    format!("{} 추천", query),
                    format!("{} 가성비", query),
                ],
            }),
            "content_creation" => json!({
                "title": format!("Everyday {} that just works", query),
                "description": format!("A {} picked for value and reliability.", query),
                "hashtags": [format!("#{}", query.replace(' ', "")), "#추천"],
            }),
            _ => return None,
        };
        Some(value)
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let output = match Self::canned(&prompt.stage, &prompt.query) {
            Some(value) => format!(
                "Here is the {} result:\n```json\n{:#}\n```",
                prompt.stage, value
            ),
            None => format!("Mock response for: {}", prompt.query),
        };
        Ok(output)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(stage: &str) -> Prompt {
        Prompt {
            stage: stage.to_string(),
            query: "wireless earbuds".to_string(),
            text: "ignored".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_output_embeds_json() {
        let raw = MockGenerator.generate(&prompt("keyword_verification")).await.unwrap();
        let extraction = sourcer_engine::extract(&raw);
        let parsed = extraction.parsed_output.unwrap();
        assert_eq!(parsed["keywords"][0], "wireless earbuds");
    }

    #[tokio::test]
    async fn test_mock_unknown_stage_is_plain_text() {
        let raw = MockGenerator.generate(&prompt("translation")).await.unwrap();
        assert!(sourcer_engine::extract(&raw).parsed_output.is_none());
    }

    #[test]
    fn test_build_selects_backend() {
        assert_eq!(build(&GeneratorConfig::Mock).name(), "mock");
        let ollama = GeneratorConfig::Ollama {
            url: "http://localhost:11434/".to_string(),
            model: "llama3.1".to_string(),
            temperature: 0.7,
        };
        assert_eq!(build(&ollama).name(), "ollama");
    }
}

//! Sourcer HTTP Client
//!
//! Typed client for the orchestrator API, shared by the runner and the CLI.
//!
//! # Example
//!
//! ```no_run
//! use sourcer_client::OrchestratorClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     let submitted = client.submit_run("wireless earbuds").await?;
//!     println!("Queued run: {}", submitted.run_id);
//!     Ok(())
//! }
//! ```

pub mod error;
mod runs;
mod safety;

pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the orchestrator API
///
/// Endpoints are grouped by concern:
/// - Runs: submit, list, inspect, cancel
/// - Runner protocol: claim, heartbeat, events, completion
/// - Safety: term checks and banned-term administration
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    base_url: String,
    client: Client,
}

impl OrchestratorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Uses a preconfigured reqwest client (timeouts, proxies, TLS)
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// WebSocket URL for live progress, optionally scoped to one run
    pub fn ws_url(&self, run_id: Option<uuid::Uuid>) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        match run_id {
            Some(id) => format!("{}/ws?run_id={}", base, id),
            None => format!("{}/ws", base),
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(api_failure(status, error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(api_failure(status, error_text));
        }

        Ok(())
    }
}

fn api_failure(status: reqwest::StatusCode, body: String) -> ClientError {
    let err = ClientError::api_error(status.as_u16(), body);
    if err.is_retryable() {
        tracing::warn!(status = status.as_u16(), "Orchestrator request failed: {}", err);
    } else {
        tracing::debug!(status = status.as_u16(), "Orchestrator rejected request: {}", err);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = OrchestratorClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_api_failure_keeps_status_and_message() {
        let err = api_failure(reqwest::StatusCode::CONFLICT, r#"{"error":"not leased"}"#.to_string());
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
        assert!(matches!(err, ClientError::ApiError { status: 409, .. }));
    }

    #[test]
    fn test_ws_url() {
        let client = OrchestratorClient::new("http://localhost:8080");
        assert_eq!(client.ws_url(None), "ws://localhost:8080/ws");

        let id = uuid::Uuid::nil();
        let secure = OrchestratorClient::new("https://sourcer.example.com");
        assert_eq!(
            secure.ws_url(Some(id)),
            format!("wss://sourcer.example.com/ws?run_id={}", id)
        );
    }
}

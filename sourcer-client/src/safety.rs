//! Safety endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use sourcer_core::domain::safety::{BannedTerm, SafetyDecision};
use sourcer_core::dto::safety::CheckTerm;

impl OrchestratorClient {
    pub async fn check_term(&self, term: &str, threshold: Option<f32>) -> Result<SafetyDecision> {
        let url = format!("{}/safety/check", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&CheckTerm {
                term: term.to_string(),
                threshold,
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn list_banned_terms(&self) -> Result<Vec<BannedTerm>> {
        let url = format!("{}/safety/terms", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    pub async fn add_banned_term(&self, term: &BannedTerm) -> Result<BannedTerm> {
        let url = format!("{}/safety/terms", self.base_url);
        let response = self.client.post(&url).json(term).send().await?;

        self.handle_response(response).await
    }
}

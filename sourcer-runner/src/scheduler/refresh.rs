//! Banned-term refresh
//!
//! The runner's index is a copy of the orchestrator's banned-term table.
//! It is rebuilt on a timer; reads keep using the previous snapshot until
//! the new one is fully embedded.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sourcer_client::OrchestratorClient;
use sourcer_core::domain::safety::BannedTerm;
use sourcer_engine::SafetyGate;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};

/// Where the authoritative banned-term list comes from
#[async_trait]
pub trait BannedTermSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<BannedTerm>>;
}

#[async_trait]
impl BannedTermSource for OrchestratorClient {
    async fn fetch(&self) -> Result<Vec<BannedTerm>> {
        self.list_banned_terms()
            .await
            .context("Failed to fetch banned terms")
    }
}

pub struct BannedTermRefresher {
    source: Arc<dyn BannedTermSource>,
    gate: Arc<SafetyGate>,
    interval: Duration,
}

impl BannedTermRefresher {
    pub fn new(source: Arc<dyn BannedTermSource>, gate: Arc<SafetyGate>, interval: Duration) -> Self {
        Self {
            source,
            gate,
            interval,
        }
    }

    /// Fetches the list and swaps it into the gate's index
    pub async fn refresh(&self) -> Result<usize> {
        let terms = self.source.fetch().await?;
        let count = self
            .gate
            .load(terms)
            .await
            .context("Failed to embed banned terms")?;
        Ok(count)
    }

    /// Refreshes every `interval`, starting one interval from now
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Refreshing banned terms every {:?}", self.interval);
            let mut ticker = time::interval(self.interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match self.refresh().await {
                    Ok(count) => debug!(count, "Banned terms refreshed"),
                    Err(e) => warn!("Banned-term refresh failed, keeping previous index: {:#}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sourcer_engine::NgramEmbedder;
    use std::sync::Mutex;

    struct Scripted(Mutex<Vec<Result<Vec<BannedTerm>>>>);

    #[async_trait]
    impl BannedTermSource for Scripted {
        async fn fetch(&self) -> Result<Vec<BannedTerm>> {
            self.0.lock().unwrap().remove(0)
        }
    }

    fn gate() -> Arc<SafetyGate> {
        Arc::new(SafetyGate::new(Arc::new(NgramEmbedder::default()), 0.8))
    }

    #[tokio::test]
    async fn test_refresh_replaces_index() {
        let gate = gate();
        let source = Scripted(Mutex::new(vec![
            Ok(vec![
                BannedTerm::new("나이키", "Global sportswear trademark", "brand"),
                BannedTerm::new("최고", "Unverifiable superlative", "advertising"),
            ]),
            Ok(vec![BannedTerm::new("나이키", "Global sportswear trademark", "brand")]),
        ]));
        let refresher = BannedTermRefresher::new(Arc::new(source), gate.clone(), Duration::from_secs(1));

        assert_eq!(refresher.refresh().await.unwrap(), 2);
        assert_eq!(refresher.refresh().await.unwrap(), 1);
        assert_eq!(gate.index().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_index() {
        let gate = gate();
        let source = Scripted(Mutex::new(vec![
            Ok(vec![BannedTerm::new("마약", "Prohibited wording", "prohibited")]),
            Err(anyhow::anyhow!("orchestrator unavailable")),
        ]));
        let refresher = BannedTermRefresher::new(Arc::new(source), gate.clone(), Duration::from_secs(1));

        refresher.refresh().await.unwrap();
        assert!(refresher.refresh().await.is_err());
        assert_eq!(gate.index().len(), 1);
        assert!(!gate.check("마약").await.unwrap().is_safe);
    }
}

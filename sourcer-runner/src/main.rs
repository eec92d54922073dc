//! Sourcer Runner
//!
//! A stateless worker that executes content-generation runs.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Remote: engine queue, publisher and sink contracts over the orchestrator API
//! - Stages: the concrete pipeline and its text generators
//! - Scheduler: run polling, lease renewal and banned-term refresh
//!
//! The runner claims queued runs from the orchestrator, executes them through
//! the pipeline engine and reports every stage boundary back as it happens.

mod config;
mod remote;
mod scheduler;
mod stages;

use anyhow::{Context, Result};
use sourcer_engine::{PipelineEngine, SafetyGate};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::remote::{RemotePublisher, RemoteQueue, RemoteSink};
use crate::scheduler::{BannedTermRefresher, RunPoller};
use sourcer_client::OrchestratorClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sourcer_runner=info,sourcer_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Sourcer Runner");

    let config = load_config()?;
    info!(
        "Loaded configuration: runner_id={}, orchestrator_url={}",
        config.runner_id, config.orchestrator_url
    );

    let client = Arc::new(OrchestratorClient::new(config.orchestrator_url.clone()));

    let gate = Arc::new(SafetyGate::new(
        config.embedder.build(),
        config.safety_threshold,
    ));
    let refresher =
        BannedTermRefresher::new(client.clone(), Arc::clone(&gate), config.banned_terms_refresh);

    // The orchestrator may still be starting; the gate is useless without terms
    info!("Loading banned terms from orchestrator");
    load_with_retry(&refresher).await?;
    let _refresh_handle = refresher.spawn();

    let generator = stages::generator::build(&config.generator);
    info!("Text generator: {}", generator.name());

    let graph = stages::sourcing_pipeline(generator).context("Invalid stage graph")?;
    let engine = PipelineEngine::new(
        graph,
        Arc::new(RemotePublisher::new(client.clone())),
        Arc::new(RemoteSink::new(client.clone(), config.runner_id.clone())),
    )
    .with_safety_gate(gate)
    .with_topic(config.topic.clone());

    let poller = RunPoller::new(
        config.clone(),
        Arc::new(RemoteQueue::new(client)),
        Arc::new(engine),
    );

    info!("Runner initialized successfully");
    info!(
        "Poll interval: {:?}, heartbeat interval: {:?}",
        config.poll_interval, config.heartbeat_interval
    );

    if let Err(e) = poller.run().await {
        error!("Poller error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Initial banned-term load with exponential backoff
async fn load_with_retry(refresher: &BannedTermRefresher) -> Result<()> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match refresher.refresh().await {
            Ok(count) => {
                info!("Loaded {} banned term(s) after {} attempt(s)", count, attempt);
                return Ok(());
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!("Failed to load banned terms after {} attempts", MAX_RETRIES);
                    return Err(e.context("Orchestrator unreachable"));
                }

                warn!(
                    "Failed to load banned terms (attempt {}/{}): {:#}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}

//! Runner configuration
//!
//! Polling, lease and index refresh intervals plus the generation and
//! embedding backends. All of it is tunable from the environment.

use sourcer_engine::safety::EmbedderConfig;
use std::time::Duration;

/// Which text generation backend the stages call
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorConfig {
    /// Canned output, no external service
    Mock,
    Ollama {
        url: String,
        model: String,
        temperature: f32,
    },
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this runner instance
    pub runner_id: String,

    /// Orchestrator base URL (e.g., "http://localhost:8080")
    pub orchestrator_url: String,

    /// How often to ask the orchestrator for queued runs
    pub poll_interval: Duration,

    /// How often a claimed run's lease is renewed; must stay well under the
    /// orchestrator's lease
    pub heartbeat_interval: Duration,

    /// Max runs executing at once on this runner
    pub max_parallel_runs: usize,

    /// Pub/sub topic progress events are published on
    pub topic: String,

    pub safety_threshold: f32,

    /// How often the banned-term index is rebuilt from the orchestrator
    pub banned_terms_refresh: Duration,

    pub generator: GeneratorConfig,

    pub embedder: EmbedderConfig,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(runner_id: String, orchestrator_url: String) -> Self {
        Self {
            runner_id,
            orchestrator_url,
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(15),
            max_parallel_runs: 2,
            topic: sourcer_engine::DEFAULT_TOPIC.to_string(),
            safety_threshold: sourcer_engine::DEFAULT_SAFETY_THRESHOLD,
            banned_terms_refresh: Duration::from_secs(300),
            generator: GeneratorConfig::Mock,
            embedder: EmbedderConfig::Ngram,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - RUNNER_ID (required)
    /// - ORCHESTRATOR_URL (required)
    /// - POLL_INTERVAL (optional, seconds, default: 5)
    /// - HEARTBEAT_INTERVAL (optional, seconds, default: 15)
    /// - MAX_PARALLEL_RUNS (optional, default: 2)
    /// - EVENT_TOPIC (optional, default: sourcing_updates)
    /// - SAFETY_THRESHOLD (optional, default: 0.8)
    /// - BANNED_TERMS_REFRESH (optional, seconds, default: 300)
    /// - GENERATOR (optional, mock|ollama, default: mock)
    /// - GENERATION_MODEL (optional, default: llama3.1)
    /// - GENERATION_TEMPERATURE (optional, default: 0.7)
    /// - EMBEDDER, OLLAMA_URL, EMBEDDING_MODEL (see `EmbedderConfig`)
    pub fn from_env() -> anyhow::Result<Self> {
        let runner_id = std::env::var("RUNNER_ID")
            .map_err(|_| anyhow::anyhow!("RUNNER_ID environment variable not set"))?;

        let orchestrator_url = std::env::var("ORCHESTRATOR_URL")
            .map_err(|_| anyhow::anyhow!("ORCHESTRATOR_URL environment variable not set"))?;

        let mut config = Self::new(runner_id, orchestrator_url);

        if let Some(secs) = env_parse::<u64>("POLL_INTERVAL") {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("HEARTBEAT_INTERVAL") {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<usize>("MAX_PARALLEL_RUNS") {
            config.max_parallel_runs = n;
        }
        if let Ok(topic) = std::env::var("EVENT_TOPIC") {
            config.topic = topic;
        }
        if let Some(threshold) = env_parse::<f32>("SAFETY_THRESHOLD") {
            config.safety_threshold = threshold;
        }
        if let Some(secs) = env_parse::<u64>("BANNED_TERMS_REFRESH") {
            config.banned_terms_refresh = Duration::from_secs(secs);
        }

        config.generator = generator_from_env()?;
        config.embedder = EmbedderConfig::from_env().map_err(anyhow::Error::msg)?;

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runner_id.is_empty() {
            anyhow::bail!("runner_id cannot be empty");
        }

        if self.orchestrator_url.is_empty() {
            anyhow::bail!("orchestrator_url cannot be empty");
        }

        if !self.orchestrator_url.starts_with("http://")
            && !self.orchestrator_url.starts_with("https://")
        {
            anyhow::bail!("orchestrator_url must start with http:// or https://");
        }

        if self.poll_interval.as_secs() == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.heartbeat_interval.as_secs() == 0 {
            anyhow::bail!("heartbeat_interval must be greater than 0");
        }

        if self.max_parallel_runs == 0 {
            anyhow::bail!("max_parallel_runs must be greater than 0");
        }

        if self.topic.is_empty() {
            anyhow::bail!("topic cannot be empty");
        }

        if !(0.0..=1.0).contains(&self.safety_threshold) {
            anyhow::bail!("safety_threshold must be within [0, 1]");
        }

        if self.banned_terms_refresh.as_secs() == 0 {
            anyhow::bail!("banned_terms_refresh must be greater than 0");
        }

        if let GeneratorConfig::Ollama { temperature, .. } = &self.generator {
            if !(0.0..=2.0).contains(temperature) {
                anyhow::bail!("generation temperature must be within [0, 2]");
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "http://localhost:8080".to_string(),
        )
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

fn generator_from_env() -> anyhow::Result<GeneratorConfig> {
    let kind = std::env::var("GENERATOR").unwrap_or_else(|_| "mock".to_string());
    match kind.to_lowercase().as_str() {
        "mock" => Ok(GeneratorConfig::Mock),
        "ollama" => Ok(GeneratorConfig::Ollama {
            url: std::env::var("OLLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            model: std::env::var("GENERATION_MODEL").unwrap_or_else(|_| "llama3.1".to_string()),
            temperature: env_parse::<f32>("GENERATION_TEMPERATURE").unwrap_or(0.7),
        }),
        other => anyhow::bail!("unknown GENERATOR '{}', expected mock or ollama", other),
    }
}

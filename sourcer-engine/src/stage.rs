//! Stage executor contract
//!
//! A stage receives the outputs of its declared predecessors and produces
//! raw text (optionally already structured). Calls to external generation,
//! search or crawl services live entirely behind this trait.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Input handed to a stage
#[derive(Debug, Clone)]
pub struct StageContext {
    pub run_id: Uuid,
    pub query: String,
    /// Predecessor stage name -> its parsed output
    pub inputs: HashMap<String, Value>,
}

impl StageContext {
    /// Output of a declared predecessor
    pub fn input(&self, stage: &str) -> Result<&Value, ExecutionError> {
        self.inputs
            .get(stage)
            .ok_or_else(|| ExecutionError::MissingInput(stage.to_string()))
    }
}

/// What a stage produced
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub raw_output: String,
    /// Structured output, when the stage already has it
    pub parsed_output: Option<Value>,
}

impl StageOutput {
    pub fn text(raw_output: impl Into<String>) -> Self {
        Self {
            raw_output: raw_output.into(),
            parsed_output: None,
        }
    }

    pub fn structured(value: Value) -> Self {
        Self {
            raw_output: value.to_string(),
            parsed_output: Some(value),
        }
    }
}

/// Stage failure, permanent for the run
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("missing input from stage '{0}'")]
    MissingInput(String),

    #[error("external service failed: {0}")]
    Service(String),

    #[error("stage failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, ExecutionError>;
}

//! Content-generation stages
//!
//! The production pipeline is a chain of four LLM stages; the third one's
//! keywords go through the safety gate before content is written.

pub mod generator;
pub mod llm;
pub mod prompts;

use sourcer_engine::graph::{GraphError, StageDefinition, StageGraph};
use std::sync::Arc;

use generator::TextGenerator;
use llm::LlmStage;

/// Builds the sourcing pipeline on top of `generator`
pub fn sourcing_pipeline(generator: Arc<dyn TextGenerator>) -> Result<StageGraph, GraphError> {
    let stage = |name: &str, template: prompts::Template| {
        StageDefinition::new(
            name,
            Arc::new(LlmStage::new(name, template, Arc::clone(&generator))),
        )
    };

    let mut builder = StageGraph::builder();
    builder
        .add_stage(stage("sourcing", prompts::sourcing))?
        .add_stage(stage("competitor_analysis", prompts::competitor_analysis).depends_on(["sourcing"]))?
        .add_stage(
            stage("keyword_verification", prompts::keyword_verification)
                .depends_on(["sourcing", "competitor_analysis"])
                .verification(),
        )?
        .add_stage(stage("content_creation", prompts::content_creation).depends_on(["keyword_verification"]))?;
    builder.build()
}

use async_trait::async_trait;
use sourcer_engine::stage::{ExecutionError, StageContext, StageExecutor, StageOutput};
use std::sync::Arc;

use super::generator::{Prompt, TextGenerator};
use super::prompts::Template;

/// A stage that renders a prompt and hands it to a text generator
pub struct LlmStage {
    name: String,
    template: Template,
    generator: Arc<dyn TextGenerator>,
}

impl LlmStage {
    pub fn new(name: impl Into<String>, template: Template, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            name: name.into(),
            template,
            generator,
        }
    }
}

#[async_trait]
impl StageExecutor for LlmStage {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, ExecutionError> {
        let prompt = Prompt {
            stage: self.name.clone(),
            query: ctx.query.clone(),
            text: (self.template)(ctx)?,
        };

        let raw = self.generator.generate(&prompt).await.map_err(|e| {
            tracing::warn!(
                run_id = %ctx.run_id,
                stage = %self.name,
                generator = self.generator.name(),
                "Generation failed: {}",
                e
            );
            ExecutionError::Service(e.to_string())
        })?;

        Ok(StageOutput::text(raw))
    }
}

//! # Discusser
//!
//! Moderates an innovation discussion over the prior stages' findings. When
//! invoked inside a rewrite cycle it also weighs the latest review feedback.

use std::sync::Arc;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{extract_json, role_prompt, ReviewOutcome, RoleHandler, StageTask, TaskRequest};
use crate::generator::Generator;

/// Output of the Innovation Discussion stage
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DiscussionOutcome {
    pub insights: Vec<String>,
    pub consensus_points: Vec<String>,
    pub next_steps: Vec<String>,
}

pub struct Discusser {
    generator: Arc<dyn Generator>,
}

impl Discusser {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    pub async fn run(
        &self,
        request: &TaskRequest,
        summaries: &[String],
        review_feedback: Option<&ReviewOutcome>,
    ) -> Result<DiscussionOutcome> {
        let payload = serde_json::json!({
            "topic": request.topic,
            "stage_summaries": summaries,
            "review_feedback": review_feedback,
            "context": request.context,
        });
        let schema = serde_json::to_value(schemars::schema_for!(DiscussionOutcome))?;
        let prompt = role_prompt(SYSTEM_PROMPT, &schema, &payload);

        let text = self.generator.generate(&prompt).await?;
        let value = extract_json(&text)?;
        serde_json::from_value(value).context("discusser returned a malformed outcome")
    }
}

#[async_trait::async_trait]
impl RoleHandler for Discusser {
    async fn handle(&self, request: &TaskRequest) -> Result<Value> {
        match &request.task {
            StageTask::Discussion {
                summaries,
                review_feedback,
            } => Ok(serde_json::to_value(
                self.run(request, summaries, review_feedback.as_ref()).await?,
            )?),
            other => anyhow::bail!("discusser received unsupported task: {other:?}"),
        }
    }
}

const SYSTEM_PROMPT: &str = super::prompts::DISCUSSER;

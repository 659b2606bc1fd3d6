//! # Rewriter
//!
//! Revises the current draft against the latest review and reports what
//! changed.

use std::sync::Arc;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{extract_json, role_prompt, Draft, ReviewOutcome, RoleHandler, StageTask, TaskRequest};
use crate::generator::Generator;

/// Output of the Final Rewrite stage
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RewriteOutcome {
    /// The revised draft
    pub draft: Draft,
    /// What was changed, one entry per edit
    pub changes: Vec<String>,
    /// Self-assessed improvement over the previous draft, 0 - 10
    pub improvement_score: f64,
}

pub struct Rewriter {
    generator: Arc<dyn Generator>,
}

impl Rewriter {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    pub async fn run(
        &self,
        request: &TaskRequest,
        draft: &Draft,
        review: &ReviewOutcome,
    ) -> Result<RewriteOutcome> {
        let payload = serde_json::json!({
            "topic": request.topic,
            "draft": draft,
            "review": review,
            "context": request.context,
        });
        let schema = serde_json::to_value(schemars::schema_for!(RewriteOutcome))?;
        let prompt = role_prompt(SYSTEM_PROMPT, &schema, &payload);

        let text = self.generator.generate(&prompt).await?;
        let value = extract_json(&text)?;
        let outcome: RewriteOutcome =
            serde_json::from_value(value).context("rewriter returned a malformed outcome")?;
        if outcome.draft.claims.is_empty() {
            anyhow::bail!("rewriter dropped all claims from the draft");
        }
        Ok(outcome)
    }
}

#[async_trait::async_trait]
impl RoleHandler for Rewriter {
    async fn handle(&self, request: &TaskRequest) -> Result<Value> {
        match &request.task {
            StageTask::Rewrite { draft, review } => {
                Ok(serde_json::to_value(self.run(request, draft, review).await?)?)
            }
            other => anyhow::bail!("rewriter received unsupported task: {other:?}"),
        }
    }
}

const SYSTEM_PROMPT: &str = super::prompts::REWRITER;

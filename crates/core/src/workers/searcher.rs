//! # Searcher
//!
//! Role-plays a prior-art search: collects plausible prior-art records for
//! the topic, assesses the risk they pose, and scores novelty.

use std::sync::Arc;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{extract_json, role_prompt, RoleHandler, StageTask, TaskRequest};
use crate::generator::Generator;

/// A single prior-art reference
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PriorArtRecord {
    /// Publication or patent identifier
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Relevance to the topic, 0.0 - 1.0
    pub relevance: f32,
}

/// Output of the Prior Art Search stage
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchReport {
    pub records: Vec<PriorArtRecord>,
    /// Narrative assessment of how crowded the field is
    pub risk_assessment: String,
    /// Novelty of the brief against the found records, 0 - 10
    pub novelty_score: f32,
}

pub struct Searcher {
    generator: Arc<dyn Generator>,
}

impl Searcher {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    pub async fn run(&self, request: &TaskRequest, keywords: &[String]) -> Result<SearchReport> {
        let payload = serde_json::json!({
            "topic": request.topic,
            "keywords": keywords,
            "context": request.context,
        });
        let schema = serde_json::to_value(schemars::schema_for!(SearchReport))?;
        let prompt = role_prompt(SYSTEM_PROMPT, &schema, &payload);

        let text = self.generator.generate(&prompt).await?;
        let value = extract_json(&text)?;
        serde_json::from_value(value).context("searcher returned a malformed report")
    }
}

#[async_trait::async_trait]
impl RoleHandler for Searcher {
    async fn handle(&self, request: &TaskRequest) -> Result<Value> {
        match &request.task {
            StageTask::Search { keywords } => {
                Ok(serde_json::to_value(self.run(request, keywords).await?)?)
            }
            other => anyhow::bail!("searcher received unsupported task: {other:?}"),
        }
    }
}

const SYSTEM_PROMPT: &str = super::prompts::SEARCHER;

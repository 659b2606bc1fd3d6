//! # Writer
//!
//! Produces the full application draft from the brief, prior artifacts, and
//! the accumulated context.

use std::sync::Arc;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{extract_json, role_prompt, RoleHandler, StageTask, TaskRequest};
use crate::generator::Generator;

/// A complete application draft. Produced by the Writer, revised by the
/// Rewriter, judged by the Reviewer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Draft {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub background: String,
    /// Summary of the invention (发明内容)
    pub summary: String,
    pub detailed_description: String,
    /// Numbered claims, in order
    pub claims: Vec<String>,
    pub drawings_description: String,
    #[serde(default)]
    pub technical_diagrams: Vec<String>,
}

pub struct Writer {
    generator: Arc<dyn Generator>,
}

impl Writer {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    pub async fn run(&self, request: &TaskRequest) -> Result<Draft> {
        let payload = serde_json::json!({
            "topic": request.topic,
            "description": request.description,
            "previous_results": request.previous_results,
            "context": request.context,
        });
        let schema = serde_json::to_value(schemars::schema_for!(Draft))?;
        let prompt = role_prompt(SYSTEM_PROMPT, &schema, &payload);

        let text = self.generator.generate(&prompt).await?;
        let value = extract_json(&text)?;
        let draft: Draft =
            serde_json::from_value(value).context("writer returned a malformed draft")?;
        if draft.claims.is_empty() {
            anyhow::bail!("writer produced a draft without claims");
        }
        Ok(draft)
    }
}

#[async_trait::async_trait]
impl RoleHandler for Writer {
    async fn handle(&self, request: &TaskRequest) -> Result<Value> {
        match &request.task {
            StageTask::Drafting => Ok(serde_json::to_value(self.run(request).await?)?),
            other => anyhow::bail!("writer received unsupported task: {other:?}"),
        }
    }
}

const SYSTEM_PROMPT: &str = super::prompts::WRITER;

#[cfg(test)]
pub(crate) fn sample_draft() -> Draft {
    Draft {
        title: "Evidence-Graph Retrieval-Augmented Generation System".into(),
        abstract_text: "A retrieval system that builds a cross-document evidence graph.".into(),
        background: "Existing RAG systems treat documents independently.".into(),
        summary: "The invention links evidence across documents.".into(),
        detailed_description: "An indexer extracts evidence nodes...".into(),
        claims: vec![
            "1. A method for retrieval-augmented generation comprising...".into(),
            "2. The method of claim 1, wherein evidence nodes...".into(),
        ],
        drawings_description: "Figure 1 shows the evidence graph builder.".into(),
        technical_diagrams: vec!["Evidence graph builder block diagram".into()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::StaticGenerator;

    fn request() -> TaskRequest {
        TaskRequest {
            task_id: "wf_stage_3".into(),
            workflow_id: "wf".into(),
            stage_index: 3,
            topic: "Evidence-Graph RAG".into(),
            description: "RAG with cross-doc evidence graph".into(),
            task: StageTask::Drafting,
            context: Default::default(),
            previous_results: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_parses_draft() {
        let reply = serde_json::to_string(&sample_draft()).unwrap();
        let generator: Arc<dyn Generator> = Arc::new(StaticGenerator::with_responses([reply], ""));
        let writer = Writer::new(generator);

        let draft = writer.run(&request()).await.unwrap();
        assert_eq!(draft.claims.len(), 2);
        assert!(draft.title.contains("Evidence-Graph"));
    }

    #[tokio::test]
    async fn test_rejects_claimless_draft() {
        let mut claimless = sample_draft();
        claimless.claims.clear();
        let reply = serde_json::to_string(&claimless).unwrap();
        let generator: Arc<dyn Generator> = Arc::new(StaticGenerator::with_responses([reply], ""));
        let writer = Writer::new(generator);

        assert!(writer.run(&request()).await.is_err());
    }

    #[test]
    fn test_abstract_field_renamed() {
        let json = serde_json::to_value(sample_draft()).unwrap();
        assert!(json.get("abstract").is_some());
        assert!(json.get("abstract_text").is_none());
    }
}

//! # Planner
//!
//! Produces the drafting strategy: innovation areas, phases, risks, and a
//! success estimate for the application.

use std::sync::Arc;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{extract_json, role_prompt, RoleHandler, StageTask, TaskRequest};
use crate::generator::Generator;

/// One phase of the drafting plan
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanPhase {
    pub name: String,
    pub objective: String,
}

/// Output of the Planning & Strategy stage
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Strategy {
    /// Candidate innovation areas to emphasize in the draft
    pub innovation_areas: Vec<String>,
    pub phases: Vec<PlanPhase>,
    pub risk_factors: Vec<String>,
    /// Rough drafting timeline, free text
    pub timeline: String,
    /// Estimated probability of grant success, 0.0 - 1.0
    pub success_probability: f32,
}

pub struct Planner {
    generator: Arc<dyn Generator>,
}

impl Planner {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    pub async fn run(&self, request: &TaskRequest) -> Result<Strategy> {
        let payload = serde_json::json!({
            "topic": request.topic,
            "description": request.description,
            "context": request.context,
        });
        let schema = serde_json::to_value(schemars::schema_for!(Strategy))?;
        let prompt = role_prompt(SYSTEM_PROMPT, &schema, &payload);

        let text = self.generator.generate(&prompt).await?;
        let value = extract_json(&text)?;
        serde_json::from_value(value).context("planner returned a malformed strategy")
    }
}

#[async_trait::async_trait]
impl RoleHandler for Planner {
    async fn handle(&self, request: &TaskRequest) -> Result<Value> {
        match &request.task {
            StageTask::Planning => Ok(serde_json::to_value(self.run(request).await?)?),
            other => anyhow::bail!("planner received unsupported task: {other:?}"),
        }
    }
}

const SYSTEM_PROMPT: &str = super::prompts::PLANNER;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::StaticGenerator;

    fn request(task: StageTask) -> TaskRequest {
        TaskRequest {
            task_id: "wf_stage_0".into(),
            workflow_id: "wf".into(),
            stage_index: 0,
            topic: "Evidence-Graph RAG".into(),
            description: "RAG with cross-doc evidence graph".into(),
            task,
            context: Default::default(),
            previous_results: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_parses_strategy_from_fenced_json() {
        let reply = r#"```json
        {
            "innovation_areas": ["cross-document evidence linking"],
            "phases": [{"name": "drafting", "objective": "write claims"}],
            "risk_factors": ["crowded prior art"],
            "timeline": "two weeks",
            "success_probability": 0.7
        }
        ```"#;
        let generator: Arc<dyn Generator> = Arc::new(StaticGenerator::with_responses([reply], ""));
        let planner = Planner::new(generator);

        let strategy = planner.run(&request(StageTask::Planning)).await.unwrap();
        assert_eq!(strategy.innovation_areas.len(), 1);
        assert_eq!(strategy.phases[0].name, "drafting");
    }

    #[tokio::test]
    async fn test_rejects_foreign_task() {
        let generator: Arc<dyn Generator> = Arc::new(StaticGenerator::new("{}"));
        let planner = Planner::new(generator);
        let result = planner.handle(&request(StageTask::Drafting)).await;
        assert!(result.is_err());
    }
}

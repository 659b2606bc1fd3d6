//! # Reviewer
//!
//! Scores the current draft for quality and compliance. The coordinator's
//! review–rewrite loop keys entirely off this stage's outcome.

use std::sync::Arc;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{extract_json, role_prompt, Draft, RoleHandler, StageTask, TaskRequest};
use crate::generator::Generator;

/// Compliance judgement over the draft as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    NeedsMinorRevision,
    NeedsMajorRevision,
    NonCompliant,
}

/// Overall review verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    ApprovedWithMinorRevisions,
    NeedsRevision,
    MajorRevisionRequired,
}

/// Output of the Quality Review stage
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReviewOutcome {
    /// Quality score 0 - 10. Lenient on the wire: numeric strings are
    /// accepted, anything unparseable becomes 0.
    #[serde(deserialize_with = "lenient_score")]
    #[schemars(with = "f64")]
    pub quality_score: f64,
    pub compliance_status: ComplianceStatus,
    pub review_outcome: ReviewVerdict,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl ReviewOutcome {
    /// Whether this review alone (before caps) calls for a rewrite
    pub fn requires_rewrite(&self, target_score: f64) -> bool {
        self.quality_score < target_score
            || !matches!(self.compliance_status, ComplianceStatus::Compliant)
            || matches!(
                self.review_outcome,
                ReviewVerdict::NeedsRevision | ReviewVerdict::MajorRevisionRequired
            )
    }
}

fn lenient_score<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

pub struct Reviewer {
    generator: Arc<dyn Generator>,
}

impl Reviewer {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    pub async fn run(&self, request: &TaskRequest, draft: &Draft) -> Result<ReviewOutcome> {
        let payload = serde_json::json!({
            "topic": request.topic,
            "draft": draft,
            "context": request.context,
        });
        let schema = serde_json::to_value(schemars::schema_for!(ReviewOutcome))?;
        let prompt = role_prompt(SYSTEM_PROMPT, &schema, &payload);

        let text = self.generator.generate(&prompt).await?;
        let value = extract_json(&text)?;
        serde_json::from_value(value).context("reviewer returned a malformed outcome")
    }
}

#[async_trait::async_trait]
impl RoleHandler for Reviewer {
    async fn handle(&self, request: &TaskRequest) -> Result<Value> {
        match &request.task {
            StageTask::Review { draft } => {
                Ok(serde_json::to_value(self.run(request, draft).await?)?)
            }
            other => anyhow::bail!("reviewer received unsupported task: {other:?}"),
        }
    }
}

const SYSTEM_PROMPT: &str = super::prompts::REVIEWER;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lenient_score_accepts_string() {
        let outcome: ReviewOutcome = serde_json::from_value(json!({
            "quality_score": "8.5",
            "compliance_status": "compliant",
            "review_outcome": "approved",
        }))
        .unwrap();
        assert_eq!(outcome.quality_score, 8.5);
    }

    #[test]
    fn test_lenient_score_defaults_garbage_to_zero() {
        let outcome: ReviewOutcome = serde_json::from_value(json!({
            "quality_score": "excellent",
            "compliance_status": "compliant",
            "review_outcome": "approved",
        }))
        .unwrap();
        assert_eq!(outcome.quality_score, 0.0);
    }

    #[test]
    fn test_requires_rewrite_rules() {
        let approved: ReviewOutcome = serde_json::from_value(json!({
            "quality_score": 9.2,
            "compliance_status": "compliant",
            "review_outcome": "approved",
        }))
        .unwrap();
        assert!(!approved.requires_rewrite(8.0));

        // Minor-revision verdict alone does not force a rewrite.
        let minor: ReviewOutcome = serde_json::from_value(json!({
            "quality_score": 8.4,
            "compliance_status": "compliant",
            "review_outcome": "approved_with_minor_revisions",
        }))
        .unwrap();
        assert!(!minor.requires_rewrite(8.0));

        // Any non-compliant status does, even with a passing score.
        let noncompliant: ReviewOutcome = serde_json::from_value(json!({
            "quality_score": 9.0,
            "compliance_status": "needs_minor_revision",
            "review_outcome": "approved",
        }))
        .unwrap();
        assert!(noncompliant.requires_rewrite(8.0));

        let low: ReviewOutcome = serde_json::from_value(json!({
            "quality_score": 6.5,
            "compliance_status": "compliant",
            "review_outcome": "approved",
        }))
        .unwrap();
        assert!(low.requires_rewrite(8.0));
    }
}

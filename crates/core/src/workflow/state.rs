//! # Workflow State
//!
//! In-memory state of one drafting run: the fixed stage list, per-stage
//! status and timing, stored results, and the review–rewrite iteration state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::stages::StageKind;
use crate::bus::fresh_id;
use crate::config::WorkflowConfig;
use crate::workers::{Draft, ReviewOutcome};

/// Per-stage lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Error,
}

/// Workflow-level lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Initialized,
    Active,
    Completed,
    Error,
}

/// Phase of the review–rewrite loop; changes monotonically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationPhase {
    Initial,
    FirstReview,
    RewriteCycle,
}

/// One stage slot in the workflow. The stage list is fixed at creation; only
/// status, timing, result, and counters mutate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub kind: StageKind,
    pub worker_name: String,
    pub status: StageStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Retries consumed; at most one per stage
    pub retry_count: u32,
    /// Times this stage has been dispatched (revisits in the loop included)
    pub executions: u32,
}

impl WorkflowStage {
    fn new(kind: StageKind) -> Self {
        Self {
            kind,
            worker_name: kind.worker_name().to_string(),
            status: StageStatus::Pending,
            start_time: None,
            end_time: None,
            error: None,
            retry_count: 0,
            executions: 0,
        }
    }
}

/// Review–rewrite counters. Both counts are non-decreasing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationState {
    pub review_count: u32,
    pub rewrite_count: u32,
    pub consecutive_failures: u32,
    pub phase: Option<IterationPhase>,
}

impl IterationState {
    pub fn advance_phase(&mut self, phase: IterationPhase) {
        // Monotonic: never move backwards.
        if self.phase.map_or(true, |current| phase > current) {
            self.phase = Some(phase);
        }
    }
}

/// One end-to-end drafting run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub topic: String,
    pub description: String,
    pub stages: Vec<WorkflowStage>,
    pub current_stage: usize,
    pub overall_status: WorkflowStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Stage results keyed `stage_<index>`; revisited stages overwrite
    pub results: BTreeMap<String, Value>,
    pub iteration: IterationState,
    pub last_error: Option<String>,
}

impl Workflow {
    pub fn new(topic: &str, description: &str) -> Self {
        Self {
            workflow_id: fresh_id(),
            topic: topic.to_string(),
            description: description.to_string(),
            stages: StageKind::PIPELINE.iter().map(|k| WorkflowStage::new(*k)).collect(),
            current_stage: 0,
            overall_status: WorkflowStatus::Initialized,
            start_time: Utc::now(),
            end_time: None,
            results: BTreeMap::new(),
            iteration: IterationState::default(),
            last_error: None,
        }
    }

    /// Correlator for a stage dispatch: `"<workflow_id>_stage_<index>"`
    pub fn task_id(&self, index: usize) -> String {
        format!("{}_stage_{}", self.workflow_id, index)
    }

    pub fn result_key(index: usize) -> String {
        format!("stage_{index}")
    }

    pub fn record_result(&mut self, index: usize, result: Value) {
        self.results.insert(Self::result_key(index), result);
    }

    pub fn stage_result(&self, index: usize) -> Option<&Value> {
        self.results.get(&Self::result_key(index))
    }

    /// Most recent draft: the rewriter's output when present, otherwise the
    /// writer's.
    pub fn latest_draft(&self) -> Option<Draft> {
        if let Some(result) = self.stage_result(StageKind::REWRITE_INDEX) {
            if let Some(draft) = result.get("draft") {
                if let Ok(draft) = serde_json::from_value(draft.clone()) {
                    return Some(draft);
                }
            }
        }
        self.stage_result(3)
            .and_then(|result| serde_json::from_value(result.clone()).ok())
    }

    /// Most recent review outcome, if the review stage has completed
    pub fn latest_review(&self) -> Option<ReviewOutcome> {
        self.stage_result(StageKind::REVIEW_INDEX)
            .and_then(|result| serde_json::from_value(result.clone()).ok())
    }

    pub fn snapshot(&self, config: &WorkflowConfig) -> WorkflowSnapshot {
        WorkflowSnapshot {
            workflow_id: self.workflow_id.clone(),
            topic: self.topic.clone(),
            overall_status: self.overall_status,
            current_stage: self.current_stage,
            stages: self
                .stages
                .iter()
                .map(|s| StageSnapshot {
                    stage_name: s.kind.stage_name().to_string(),
                    worker_name: s.worker_name.clone(),
                    status: s.status,
                    start_time: s.start_time,
                    end_time: s.end_time,
                    retry_count: s.retry_count,
                    executions: s.executions,
                    error: s.error.clone(),
                })
                .collect(),
            iteration: IterationSnapshot {
                review_count: self.iteration.review_count,
                rewrite_count: self.iteration.rewrite_count,
                consecutive_failures: self.iteration.consecutive_failures,
                phase: self.iteration.phase,
                warnings: IterationWarnings {
                    review_limit_approaching: self.iteration.review_count + 1
                        >= config.max_reviews,
                    rewrite_limit_approaching: self.iteration.rewrite_count + 1
                        >= config.max_rewrites,
                },
            },
            last_error: self.last_error.clone(),
            results: if self.overall_status == WorkflowStatus::Completed
                || self.overall_status == WorkflowStatus::Error
            {
                Some(self.results.clone())
            } else {
                None
            },
        }
    }
}

/// Read-only status view returned by `get_workflow_status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSnapshot {
    pub workflow_id: String,
    pub topic: String,
    pub overall_status: WorkflowStatus,
    pub current_stage: usize,
    pub stages: Vec<StageSnapshot>,
    pub iteration: IterationSnapshot,
    pub last_error: Option<String>,
    /// Final results, present once the workflow has finished
    pub results: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSnapshot {
    pub stage_name: String,
    pub worker_name: String,
    pub status: StageStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub executions: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IterationSnapshot {
    pub review_count: u32,
    pub rewrite_count: u32,
    pub consecutive_failures: u32,
    pub phase: Option<IterationPhase>,
    pub warnings: IterationWarnings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IterationWarnings {
    pub review_limit_approaching: bool,
    pub rewrite_limit_approaching: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_workflow_has_six_pending_stages() {
        let wf = Workflow::new("T", "D");
        assert_eq!(wf.stages.len(), 6);
        assert!(wf.stages.iter().all(|s| s.status == StageStatus::Pending));
        assert_eq!(wf.overall_status, WorkflowStatus::Initialized);
        assert_eq!(wf.stages[3].worker_name, "writer");
    }

    #[test]
    fn test_task_id_format() {
        let wf = Workflow::new("T", "D");
        assert_eq!(wf.task_id(4), format!("{}_stage_4", wf.workflow_id));
    }

    #[test]
    fn test_distinct_workflow_ids() {
        let a = Workflow::new("T", "D");
        let b = Workflow::new("T", "D");
        assert_ne!(a.workflow_id, b.workflow_id);
    }

    #[test]
    fn test_latest_draft_prefers_rewrite() {
        let mut wf = Workflow::new("T", "D");
        let draft = crate::workers::writer::sample_draft();
        wf.record_result(3, serde_json::to_value(&draft).unwrap());
        assert_eq!(wf.latest_draft().unwrap().title, draft.title);

        let mut revised = draft.clone();
        revised.title = "Revised Title".into();
        wf.record_result(
            5,
            json!({ "draft": revised, "changes": [], "improvement_score": 1.0 }),
        );
        assert_eq!(wf.latest_draft().unwrap().title, "Revised Title");
    }

    #[test]
    fn test_result_overwrite_latest_wins() {
        let mut wf = Workflow::new("T", "D");
        wf.record_result(4, json!({ "pass": false }));
        wf.record_result(4, json!({ "pass": true }));
        assert_eq!(wf.stage_result(4).unwrap()["pass"], true);
    }

    #[test]
    fn test_phase_is_monotonic() {
        let mut it = IterationState::default();
        it.advance_phase(IterationPhase::FirstReview);
        it.advance_phase(IterationPhase::RewriteCycle);
        it.advance_phase(IterationPhase::FirstReview);
        assert_eq!(it.phase, Some(IterationPhase::RewriteCycle));
    }

    #[test]
    fn test_snapshot_warnings_near_caps() {
        let config = WorkflowConfig::default();
        let mut wf = Workflow::new("T", "D");
        wf.iteration.review_count = 2;
        let snap = wf.snapshot(&config);
        assert!(snap.iteration.warnings.review_limit_approaching);
        assert!(!snap.iteration.warnings.rewrite_limit_approaching);
        assert!(snap.results.is_none(), "results hidden while active");
    }
}

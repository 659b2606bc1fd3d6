//! # Workflow Events
//!
//! Observability stream emitted by the coordinator. Consumers attach an mpsc
//! channel; a full or dropped channel never affects the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::fresh_id;

/// Kind of workflow event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventKind {
    WorkflowStarted,
    StageStarted,
    StageCompleted,
    StageFailed,
    /// Stage errored and its single retry was scheduled
    StageRetried,
    /// Review outcome requires a rewrite; looping back
    ReviewRejected,
    /// Iteration caps or consecutive failures forced completion
    CompletionForced,
    WorkflowCompleted,
    WorkflowFailed,
}

/// An event in a workflow's lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: WorkflowEventKind,
    pub workflow_id: String,
    /// Stage name when the event is stage-scoped
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl WorkflowEvent {
    pub fn new(kind: WorkflowEventKind, workflow_id: &str) -> Self {
        Self {
            id: fresh_id(),
            timestamp: Utc::now(),
            kind,
            workflow_id: workflow_id.to_string(),
            stage: None,
            data: None,
        }
    }

    pub fn with_stage(mut self, stage: &str) -> Self {
        self.stage = Some(stage.to_string());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

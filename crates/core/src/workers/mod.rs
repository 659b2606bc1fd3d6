//! # Workers
//!
//! Worker base behavior (mailbox loop, status reporting) plus the six role
//! workers. Each role worker is thin: it shapes a prompt for the external
//! [`Generator`](crate::generator::Generator) and parses the reply into a
//! typed artifact.

pub mod discusser;
pub mod planner;
pub mod prompts;
pub mod reviewer;
pub mod rewriter;
pub mod searcher;
pub mod writer;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bus::{Message, MessageBus, MessageKind, WorkerStatus};
use crate::context::ContextView;
use crate::generator::Generator;

pub use discusser::{DiscussionOutcome, Discusser};
pub use planner::{Planner, Strategy};
pub use reviewer::{ComplianceStatus, ReviewOutcome, ReviewVerdict, Reviewer};
pub use rewriter::{RewriteOutcome, Rewriter};
pub use searcher::{PriorArtRecord, SearchReport, Searcher};
pub use writer::{Draft, Writer};

/// How long a worker blocks on its mailbox per loop iteration
const MAILBOX_POLL: Duration = Duration::from_millis(100);

/// Stage-specific task payload. A closed set: every worker matches its own
/// variant at the boundary and rejects the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageTask {
    Planning,
    Search {
        keywords: Vec<String>,
    },
    Discussion {
        summaries: Vec<String>,
        #[serde(default)]
        review_feedback: Option<ReviewOutcome>,
    },
    Drafting,
    Review {
        draft: Draft,
    },
    Rewrite {
        draft: Draft,
        review: ReviewOutcome,
    },
}

/// Task body carried by a coordination message.
///
/// Handlers must be pure with respect to workflow state: everything a stage
/// needs arrives inside this envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Correlator: `"<workflow_id>_stage_<index>"`
    pub task_id: String,
    pub workflow_id: String,
    pub stage_index: usize,
    pub topic: String,
    pub description: String,
    pub task: StageTask,
    #[serde(default)]
    pub context: ContextView,
    /// Results of prior stages, keyed `stage_<index>`
    #[serde(default)]
    pub previous_results: BTreeMap<String, Value>,
}

/// Body of the status message a worker publishes after a coordination task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub status: TaskState,
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Handler wall time in seconds
    pub execution_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Completed,
    Failed,
}

/// Role-specific task handler. One per worker; the base loop owns everything
/// else (polling, status reporting, liveness updates).
#[async_trait::async_trait]
pub trait RoleHandler: Send + Sync {
    async fn handle(&self, request: &TaskRequest) -> Result<Value>;
}

/// A registered worker: mailbox loop around a [`RoleHandler`].
pub struct Worker {
    name: String,
    capabilities: Vec<&'static str>,
    bus: Arc<MessageBus>,
    handler: Arc<dyn RoleHandler>,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        capabilities: Vec<&'static str>,
        bus: Arc<MessageBus>,
        handler: Arc<dyn RoleHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            capabilities,
            bus,
            handler,
        }
    }

    /// Register on the bus and start the mailbox loop. The loop exits when the
    /// worker's registration disappears (cooperative shutdown).
    pub fn spawn(self) -> JoinHandle<()> {
        self.bus.register(&self.name, &self.capabilities);
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        loop {
            match self.bus.poll(&self.name, MAILBOX_POLL).await {
                Some(message) => match message.kind {
                    MessageKind::Coordination => self.handle_coordination(message).await,
                    MessageKind::Error => {
                        tracing::warn!(
                            worker = %self.name,
                            sender = %message.sender,
                            body = %message.body,
                            "error message received"
                        );
                    }
                    _ => {}
                },
                None => {
                    if !self.bus.is_registered(&self.name) {
                        tracing::debug!(worker = %self.name, "unregistered, stopping loop");
                        break;
                    }
                }
            }
        }
    }

    async fn handle_coordination(&self, message: Message) {
        let started = Instant::now();
        let request: TaskRequest = match serde_json::from_value(message.body.clone()) {
            Ok(request) => request,
            Err(e) => {
                // Without a parseable task_id there is nothing to correlate;
                // the coordinator's timeout covers this.
                tracing::warn!(worker = %self.name, error = %e, "malformed coordination body");
                return;
            }
        };

        self.bus.update_status(
            &self.name,
            WorkerStatus::Busy,
            Some(request.task_id.clone()),
        );

        let outcome = self.handler.handle(&request).await;
        let execution_time = started.elapsed().as_secs_f64();
        let status = match outcome {
            Ok(result) => TaskStatus {
                task_id: request.task_id.clone(),
                status: TaskState::Completed,
                success: true,
                result: Some(result),
                error: None,
                execution_time,
            },
            Err(e) => {
                tracing::warn!(worker = %self.name, task_id = %request.task_id, error = %e, "task failed");
                TaskStatus {
                    task_id: request.task_id.clone(),
                    status: TaskState::Failed,
                    success: false,
                    result: None,
                    error: Some(format!("{e:#}")),
                    execution_time,
                }
            }
        };

        let body = serde_json::to_value(&status).unwrap_or(Value::Null);
        self.bus.send(Message::new(
            MessageKind::Status,
            &self.name,
            &message.sender,
            body,
        ));
        self.bus
            .update_status(&self.name, WorkerStatus::Idle, None);
    }
}

/// Spawn the standard six role workers against one generator.
pub fn spawn_role_workers(
    bus: &Arc<MessageBus>,
    generator: &Arc<dyn Generator>,
) -> Vec<JoinHandle<()>> {
    let roles: Vec<(&'static str, Vec<&'static str>, Arc<dyn RoleHandler>)> = vec![
        (
            "planner",
            vec!["planning", "strategy"],
            Arc::new(Planner::new(generator.clone())),
        ),
        (
            "searcher",
            vec!["prior_art"],
            Arc::new(Searcher::new(generator.clone())),
        ),
        (
            "discusser",
            vec!["discussion"],
            Arc::new(Discusser::new(generator.clone())),
        ),
        (
            "writer",
            vec!["drafting"],
            Arc::new(Writer::new(generator.clone())),
        ),
        (
            "reviewer",
            vec!["review", "quality"],
            Arc::new(Reviewer::new(generator.clone())),
        ),
        (
            "rewriter",
            vec!["rewrite"],
            Arc::new(Rewriter::new(generator.clone())),
        ),
    ];

    roles
        .into_iter()
        .map(|(name, caps, handler)| Worker::new(name, caps, bus.clone(), handler).spawn())
        .collect()
}

/// Assemble a role prompt: system instructions, expected output schema, and
/// the task payload.
pub(crate) fn role_prompt(system: &str, schema: &Value, task_payload: &Value) -> String {
    format!(
        "{system}\n\n\
         Respond with a single JSON object matching this schema:\n```json\n{}\n```\n\n\
         Task:\n```json\n{}\n```",
        serde_json::to_string_pretty(schema).unwrap_or_default(),
        serde_json::to_string_pretty(task_payload).unwrap_or_default(),
    )
}

/// Pull the first JSON object (or array) out of generator text.
///
/// Accepts fenced ```json blocks, bare fences, or raw JSON embedded in prose.
pub fn extract_json(text: &str) -> Result<Value> {
    // Fenced block first.
    for fence in ["```json", "```"] {
        if let Some(start) = text.find(fence) {
            let rest = &text[start + fence.len()..];
            if let Some(end) = rest.find("```") {
                let candidate = rest[..end].trim();
                if !candidate.is_empty() {
                    if let Ok(value) = serde_json::from_str(candidate) {
                        return Ok(value);
                    }
                }
            }
        }
    }

    // Otherwise widest brace/bracket span.
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if end > start {
                if let Ok(value) = serde_json::from_str(text[start..=end].trim()) {
                    return Ok(value);
                }
            }
        }
    }

    serde_json::from_str(text.trim()).context("generator output contained no parseable JSON")
}

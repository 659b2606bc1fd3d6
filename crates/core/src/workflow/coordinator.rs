//! # Workflow Coordinator
//!
//! Drives the staged pipeline: dispatches tasks over the message bus, awaits
//! completion promises per task_id, applies the single-retry rule, runs the
//! review–rewrite loop, and compiles the final document.
//!
//! The coordinator is itself a worker: it registers on the bus and consumes
//! status messages from its own mailbox. It also keeps all in-process
//! workflow state; nothing survives a restart by design.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use super::compile;
use super::events::{WorkflowEvent, WorkflowEventKind};
use super::stages::StageKind;
use super::state::{
    IterationPhase, StageStatus, Workflow, WorkflowSnapshot, WorkflowStatus,
};
use crate::bus::{Message, MessageBus, MessageKind};
use crate::config::WorkflowConfig;
use crate::context::ContextManager;
use crate::error::StageError;
use crate::output::FileSink;
use crate::workers::{
    ComplianceStatus, ReviewOutcome, ReviewVerdict, StageTask, TaskRequest, TaskStatus,
};

/// Bus name the coordinator registers under
pub const COORDINATOR_NAME: &str = "coordinator";

/// How long the inbox loop blocks per poll
const INBOX_POLL: Duration = Duration::from_millis(200);

/// Grace period before declaring a worker unavailable at dispatch
const AVAILABILITY_WAIT: Duration = Duration::from_millis(200);

/// The workflow coordinator. Construct with explicit collaborators (bus,
/// context manager, file sink); multiple coordinators may coexist in one
/// process.
pub struct Coordinator {
    bus: Arc<MessageBus>,
    context: Arc<ContextManager>,
    sink: Arc<dyn FileSink>,
    config: WorkflowConfig,
    active: Mutex<HashMap<String, Workflow>>,
    completed: Mutex<HashMap<String, Workflow>>,
    /// Completion promises keyed by task_id, resolved by the inbox loop
    pending: Mutex<HashMap<String, oneshot::Sender<TaskStatus>>>,
    event_tx: Option<mpsc::Sender<WorkflowEvent>>,
    accepting: AtomicBool,
    started: AtomicBool,
}

impl Coordinator {
    pub fn new(
        bus: Arc<MessageBus>,
        context: Arc<ContextManager>,
        sink: Arc<dyn FileSink>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            bus,
            context,
            sink,
            config,
            active: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            event_tx: None,
            accepting: AtomicBool::new(true),
            started: AtomicBool::new(false),
        }
    }

    /// Attach an event channel for streaming lifecycle events
    pub fn with_event_channel(mut self, tx: mpsc::Sender<WorkflowEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Create a workflow, seed its context, dispatch stage 0, and return
    /// immediately with the new workflow id.
    pub fn start_workflow(self: &Arc<Self>, topic: &str, description: &str) -> Result<String> {
        if !self.accepting.load(Ordering::SeqCst) {
            anyhow::bail!("coordinator is stopped and accepts no new workflows");
        }
        self.ensure_started();

        let workflow = Workflow::new(topic, description);
        let workflow_id = workflow.workflow_id.clone();
        self.context.initialize(&workflow_id, topic, description);
        self.active
            .lock()
            .unwrap()
            .insert(workflow_id.clone(), workflow);

        let this = Arc::clone(self);
        let id = workflow_id.clone();
        tokio::spawn(async move { this.run_workflow(id).await });

        Ok(workflow_id)
    }

    /// Read-only status snapshot; repeated calls are equal while nothing
    /// dispatches or completes in between.
    pub fn get_workflow_status(&self, workflow_id: &str) -> Option<WorkflowSnapshot> {
        if let Some(wf) = self.active.lock().unwrap().get(workflow_id) {
            return Some(wf.snapshot(&self.config));
        }
        self.completed
            .lock()
            .unwrap()
            .get(workflow_id)
            .map(|wf| wf.snapshot(&self.config))
    }

    /// Cooperative shutdown: stop accepting workflows and unregister every
    /// worker (pending mailbox messages are discarded by the bus).
    pub fn stop(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        for name in self.bus.worker_names() {
            self.bus.unregister(&name);
        }
    }

    /// Register on the bus and start the status inbox loop (once)
    fn ensure_started(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.bus.register(COORDINATOR_NAME, &["orchestration"]);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.inbox_loop().await });
    }

    /// Consume status messages and resolve the matching completion promise.
    /// Late completions (timed-out task_ids) find no promise and are
    /// discarded without touching workflow state.
    async fn inbox_loop(self: Arc<Self>) {
        loop {
            match self.bus.poll(COORDINATOR_NAME, INBOX_POLL).await {
                Some(message) => match message.kind {
                    MessageKind::Status => {
                        match serde_json::from_value::<TaskStatus>(message.body) {
                            Ok(status) => {
                                let promise =
                                    self.pending.lock().unwrap().remove(&status.task_id);
                                match promise {
                                    Some(tx) => {
                                        let _ = tx.send(status);
                                    }
                                    None => tracing::debug!(
                                        task_id = %status.task_id,
                                        "late or unknown completion discarded"
                                    ),
                                }
                            }
                            Err(e) => {
                                tracing::warn!(sender = %message.sender, error = %e, "malformed status message");
                            }
                        }
                    }
                    MessageKind::Error => {
                        tracing::warn!(sender = %message.sender, body = %message.body, "error message received");
                    }
                    _ => {}
                },
                None => {
                    if !self.bus.is_registered(COORDINATOR_NAME) {
                        break;
                    }
                }
            }
        }
    }

    /// Sequential stage driver with the review–rewrite loop.
    #[tracing::instrument(skip(self))]
    async fn run_workflow(self: Arc<Self>, workflow_id: String) {
        self.with_workflow(&workflow_id, |wf| {
            wf.overall_status = WorkflowStatus::Active;
        });
        self.emit(WorkflowEvent::new(
            WorkflowEventKind::WorkflowStarted,
            &workflow_id,
        ));

        let mut index = 0usize;
        let final_status = loop {
            let kind = StageKind::PIPELINE[index];
            match self.run_stage_with_retry(&workflow_id, index).await {
                Ok(result) => match kind {
                    StageKind::Review => {
                        let review = parse_review(&result);
                        let (needs_rewrite, forced) =
                            self.apply_review_outcome(&workflow_id, &review);
                        if forced {
                            self.emit(
                                WorkflowEvent::new(
                                    WorkflowEventKind::CompletionForced,
                                    &workflow_id,
                                )
                                .with_stage(kind.stage_name()),
                            );
                        }
                        if needs_rewrite {
                            self.emit(
                                WorkflowEvent::new(
                                    WorkflowEventKind::ReviewRejected,
                                    &workflow_id,
                                )
                                .with_stage(kind.stage_name())
                                .with_data(json!({ "quality_score": review.quality_score })),
                            );
                            index = StageKind::REWRITE_INDEX;
                        } else {
                            break WorkflowStatus::Completed;
                        }
                    }
                    StageKind::Rewrite => {
                        // Only reachable from a review that requested it, so
                        // the caps were already checked there.
                        self.with_workflow(&workflow_id, |wf| {
                            wf.iteration.rewrite_count += 1;
                            wf.iteration.advance_phase(IterationPhase::RewriteCycle);
                        });

                        if self.config.discuss_after_rewrite {
                            // Direction check only; a failed discussion never
                            // derails the cycle.
                            if let Err(e) = self
                                .run_stage_with_retry(&workflow_id, StageKind::DISCUSSION_INDEX)
                                .await
                            {
                                tracing::warn!(workflow_id, error = %e, "post-rewrite discussion failed");
                            }
                        }

                        index = StageKind::REVIEW_INDEX;
                    }
                    _ => {
                        if index + 1 < StageKind::PIPELINE.len() {
                            index += 1;
                        } else {
                            break WorkflowStatus::Completed;
                        }
                    }
                },
                Err(error) => {
                    if !error.is_retryable() {
                        // Unavailable worker: no retry, workflow aborts.
                        break WorkflowStatus::Error;
                    }
                    // Single retry already consumed.
                    if kind == StageKind::Review {
                        // A dead review cannot justify another rewrite;
                        // settle for the latest draft if one exists.
                        let has_draft = self
                            .with_workflow(&workflow_id, |wf| wf.latest_draft().is_some())
                            .unwrap_or(false);
                        if has_draft {
                            tracing::warn!(
                                workflow_id,
                                "review stage failed after retry, completing with current draft"
                            );
                            break WorkflowStatus::Completed;
                        }
                        break WorkflowStatus::Error;
                    }
                    // Advance past the dead stage, or give up at the end of
                    // the pipeline.
                    if index + 1 < StageKind::PIPELINE.len() {
                        index += 1;
                    } else {
                        break WorkflowStatus::Error;
                    }
                }
            }
        };

        self.finish_workflow(&workflow_id, final_status).await;
    }

    /// Apply the review–rewrite decision rules. Returns
    /// `(needs_rewrite, forced_completion)`.
    fn apply_review_outcome(
        &self,
        workflow_id: &str,
        review: &ReviewOutcome,
    ) -> (bool, bool) {
        let config = &self.config;
        self.with_workflow(workflow_id, |wf| {
            let iteration = &mut wf.iteration;
            iteration.review_count += 1;
            iteration.advance_phase(IterationPhase::FirstReview);

            // The bar drops after two reviews, but never below 6.0.
            let adjusted_target = if iteration.review_count > 2 {
                (config.target_quality_score - 1.0).max(6.0)
            } else {
                config.target_quality_score
            };

            let mut needs_rewrite = review.requires_rewrite(adjusted_target);
            let mut forced = false;

            if needs_rewrite {
                if iteration.review_count > 1 {
                    iteration.consecutive_failures += 1;
                    if iteration.consecutive_failures >= config.max_consecutive_failures {
                        tracing::warn!(
                            workflow_id,
                            failures = iteration.consecutive_failures,
                            "consecutive review failures reached cap, forcing completion"
                        );
                        needs_rewrite = false;
                        forced = true;
                    }
                }
            } else {
                iteration.consecutive_failures = 0;
            }

            if iteration.rewrite_count >= config.max_rewrites
                || iteration.review_count >= config.max_reviews
            {
                if needs_rewrite {
                    forced = true;
                }
                needs_rewrite = false;
            }

            (needs_rewrite, forced)
        })
        .unwrap_or((false, false))
    }

    /// Execute one stage, applying the single-retry rule for retryable
    /// failures.
    async fn run_stage_with_retry(
        &self,
        workflow_id: &str,
        index: usize,
    ) -> Result<Value, StageError> {
        match self.execute_stage(workflow_id, index).await {
            Ok(result) => {
                self.complete_stage(workflow_id, index, &result).await;
                Ok(result)
            }
            Err(first) => {
                self.fail_stage(workflow_id, index, &first);
                let retry_granted = first.is_retryable()
                    && self
                        .with_workflow(workflow_id, |wf| {
                            let stage = &mut wf.stages[index];
                            if stage.retry_count == 0 {
                                stage.retry_count = 1;
                                stage.status = StageStatus::Pending;
                                true
                            } else {
                                false
                            }
                        })
                        .unwrap_or(false);
                if !retry_granted {
                    return Err(first);
                }

                self.emit(
                    WorkflowEvent::new(WorkflowEventKind::StageRetried, workflow_id)
                        .with_stage(StageKind::PIPELINE[index].stage_name())
                        .with_data(json!({ "error": first.to_string() })),
                );
                tokio::time::sleep(self.config.retry_delay()).await;

                match self.execute_stage(workflow_id, index).await {
                    Ok(result) => {
                        self.complete_stage(workflow_id, index, &result).await;
                        Ok(result)
                    }
                    Err(second) => {
                        self.fail_stage(workflow_id, index, &second);
                        Err(second)
                    }
                }
            }
        }
    }

    /// Dispatch one stage and await its completion promise.
    async fn execute_stage(
        &self,
        workflow_id: &str,
        index: usize,
    ) -> Result<Value, StageError> {
        let kind = StageKind::PIPELINE[index];
        let worker = kind.worker_name();

        if !self.worker_available(worker) {
            tokio::time::sleep(AVAILABILITY_WAIT).await;
            if !self.worker_available(worker) {
                return Err(StageError::WorkerUnavailable {
                    worker: worker.to_string(),
                });
            }
        }

        let context_view = self
            .context
            .view(workflow_id, worker, kind.needed_context());

        let (task_id, message) = {
            let mut active = self.active.lock().unwrap();
            let wf = active
                .get_mut(workflow_id)
                .ok_or_else(|| StageError::TaskFailed {
                    stage: kind.stage_name().to_string(),
                    reason: "unknown workflow".to_string(),
                })?;

            let task = build_stage_task(wf, kind)?;

            wf.current_stage = index;
            let stage = &mut wf.stages[index];
            stage.status = StageStatus::Running;
            stage.start_time = Some(Utc::now());
            stage.end_time = None;
            stage.executions += 1;

            let task_id = wf.task_id(index);
            let request = TaskRequest {
                task_id: task_id.clone(),
                workflow_id: workflow_id.to_string(),
                stage_index: index,
                topic: wf.topic.clone(),
                description: wf.description.clone(),
                task,
                context: context_view,
                previous_results: wf.results.clone(),
            };
            let body = serde_json::to_value(&request).map_err(|e| StageError::TaskFailed {
                stage: kind.stage_name().to_string(),
                reason: format!("failed to encode task: {e}"),
            })?;
            (
                task_id,
                Message::new(MessageKind::Coordination, COORDINATOR_NAME, worker, body),
            )
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(task_id.clone(), tx);

        self.emit(
            WorkflowEvent::new(WorkflowEventKind::StageStarted, workflow_id)
                .with_stage(kind.stage_name()),
        );
        self.bus.send(message);

        match tokio::time::timeout(self.config.stage_timeout(), rx).await {
            Ok(Ok(status)) => {
                if status.success {
                    Ok(status.result.unwrap_or(Value::Null))
                } else {
                    Err(StageError::TaskFailed {
                        stage: kind.stage_name().to_string(),
                        reason: status
                            .error
                            .unwrap_or_else(|| "worker reported failure".to_string()),
                    })
                }
            }
            Ok(Err(_)) => Err(StageError::TaskFailed {
                stage: kind.stage_name().to_string(),
                reason: "completion channel closed".to_string(),
            }),
            Err(_) => {
                // Drop the promise so a late completion is discarded.
                self.pending.lock().unwrap().remove(&task_id);
                Err(StageError::Timeout {
                    stage: kind.stage_name().to_string(),
                    seconds: self.config.stage_timeout_secs,
                })
            }
        }
    }

    fn worker_available(&self, worker: &str) -> bool {
        self.bus
            .worker_info(worker)
            .map(|info| info.status.is_available())
            .unwrap_or(false)
    }

    async fn complete_stage(&self, workflow_id: &str, index: usize, result: &Value) {
        let kind = StageKind::PIPELINE[index];
        self.with_workflow(workflow_id, |wf| {
            let stage = &mut wf.stages[index];
            stage.status = StageStatus::Completed;
            stage.end_time = Some(Utc::now());
            stage.error = None;
            wf.record_result(index, result.clone());
        });

        self.context
            .extract_from_result(workflow_id, index, result, kind);
        self.context.validate(
            workflow_id,
            kind.worker_name(),
            &result.to_string(),
            kind.stage_name(),
        );

        if self.config.write_progress {
            self.write_progress(workflow_id, index, result).await;
        }

        self.emit(
            WorkflowEvent::new(WorkflowEventKind::StageCompleted, workflow_id)
                .with_stage(kind.stage_name()),
        );
    }

    fn fail_stage(&self, workflow_id: &str, index: usize, error: &StageError) {
        let kind = StageKind::PIPELINE[index];
        let text = error.to_string();
        self.with_workflow(workflow_id, |wf| {
            let stage = &mut wf.stages[index];
            stage.status = StageStatus::Error;
            stage.end_time = Some(Utc::now());
            stage.error = Some(text.clone());
            wf.last_error = Some(text.clone());
        });
        tracing::warn!(workflow_id, stage = kind.stage_name(), error = %text, "stage failed");
        self.emit(
            WorkflowEvent::new(WorkflowEventKind::StageFailed, workflow_id)
                .with_stage(kind.stage_name())
                .with_data(json!({ "error": text })),
        );
    }

    async fn write_progress(&self, workflow_id: &str, index: usize, result: &Value) {
        let (topic, status) = match self.with_workflow(workflow_id, |wf| {
            (wf.topic.clone(), wf.stages[index].status)
        }) {
            Some(pair) => pair,
            None => return,
        };
        let kind = StageKind::PIPELINE[index];
        let dir = self
            .config
            .output_dir
            .join(compile::progress_dirname(&topic, workflow_id));
        let fragment = compile::stage_fragment(kind, status, result);

        let stage_file = dir.join(format!("{}_stage_{}.md", kind.worker_name(), index));
        if let Err(e) = self.sink.write(&stage_file, &fragment).await {
            tracing::warn!(workflow_id, error = %format!("{e:#}"), "failed to write stage progress");
        }
        if let Err(e) = self.sink.append(&dir.join("progress.md"), &fragment).await {
            tracing::warn!(workflow_id, error = %format!("{e:#}"), "failed to append progress");
        }
    }

    /// Compile the final document (always, even for error outcomes), move the
    /// workflow to the completed set, and broadcast the outcome.
    async fn finish_workflow(&self, workflow_id: &str, status: WorkflowStatus) {
        let workflow = self.active.lock().unwrap().remove(workflow_id);
        let Some(mut workflow) = workflow else {
            return;
        };
        workflow.overall_status = status;
        workflow.end_time = Some(Utc::now());

        let document = compile::final_document(&workflow);
        let path = self
            .config
            .output_dir
            .join(compile::document_filename(&workflow.topic, workflow_id));
        if let Err(e) = self.sink.write(&path, &document).await {
            tracing::warn!(workflow_id, error = %format!("{e:#}"), "failed to write final document");
        }

        match status {
            WorkflowStatus::Completed => {
                self.bus.broadcast(
                    MessageKind::Status,
                    json!({
                        "workflow_id": workflow_id,
                        "overall_status": "completed",
                        "document": path.display().to_string(),
                    }),
                    COORDINATOR_NAME,
                    0,
                );
                self.emit(
                    WorkflowEvent::new(WorkflowEventKind::WorkflowCompleted, workflow_id)
                        .with_data(json!({ "document": path.display().to_string() })),
                );
            }
            _ => {
                self.bus.broadcast(
                    MessageKind::Error,
                    json!({
                        "workflow_id": workflow_id,
                        "error": workflow.last_error,
                    }),
                    COORDINATOR_NAME,
                    0,
                );
                self.emit(
                    WorkflowEvent::new(WorkflowEventKind::WorkflowFailed, workflow_id)
                        .with_data(json!({ "error": workflow.last_error })),
                );
            }
        }

        tracing::info!(workflow_id, ?status, "workflow finished");
        self.completed
            .lock()
            .unwrap()
            .insert(workflow_id.to_string(), workflow);
    }

    fn with_workflow<R>(
        &self,
        workflow_id: &str,
        f: impl FnOnce(&mut Workflow) -> R,
    ) -> Option<R> {
        self.active.lock().unwrap().get_mut(workflow_id).map(f)
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.try_send(event);
        }
    }
}

/// Build the stage-specific payload from recorded workflow state
fn build_stage_task(workflow: &Workflow, kind: StageKind) -> Result<StageTask, StageError> {
    let missing = |what: &str| StageError::TaskFailed {
        stage: kind.stage_name().to_string(),
        reason: format!("no {what} available"),
    };

    Ok(match kind {
        StageKind::Planning => StageTask::Planning,
        StageKind::Search => StageTask::Search {
            keywords: search_keywords(workflow),
        },
        StageKind::Discussion => StageTask::Discussion {
            summaries: stage_summaries(workflow),
            // After a review the discussion validates the revision direction.
            review_feedback: if workflow.iteration.review_count > 0 {
                workflow.latest_review()
            } else {
                None
            },
        },
        StageKind::Drafting => StageTask::Drafting,
        StageKind::Review => StageTask::Review {
            draft: workflow.latest_draft().ok_or_else(|| missing("draft"))?,
        },
        StageKind::Rewrite => StageTask::Rewrite {
            draft: workflow.latest_draft().ok_or_else(|| missing("draft"))?,
            review: workflow
                .latest_review()
                .ok_or_else(|| missing("review outcome"))?,
        },
    })
}

/// Search keywords: topic tokens, deduplicated, capped
fn search_keywords(workflow: &Workflow) -> Vec<String> {
    const STOPWORDS: &[&str] = &["for", "and", "the", "with", "from", "into", "over", "using"];
    let mut keywords: Vec<String> = Vec::new();
    for token in workflow.topic.split_whitespace() {
        let word = token
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if word.len() >= 3 && !STOPWORDS.contains(&word.as_str()) && !keywords.contains(&word) {
            keywords.push(word);
        }
    }
    keywords.truncate(10);
    keywords
}

/// One-line summaries of prior stage results for the discussion panel
fn stage_summaries(workflow: &Workflow) -> Vec<String> {
    let mut summaries = Vec::new();
    for (index, stage) in workflow.stages.iter().enumerate() {
        if let Some(result) = workflow.stage_result(index) {
            let mut text = result.to_string();
            if text.len() > 400 {
                text.truncate(400);
                text.push('…');
            }
            summaries.push(format!("{}: {}", stage.kind.stage_name(), text));
        }
    }
    summaries
}

/// Parse a review result leniently: anything unreadable counts as a
/// non-compliant zero-score review, which the loop then handles.
fn parse_review(result: &Value) -> ReviewOutcome {
    serde_json::from_value(result.clone()).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "unparseable review outcome, treating as non-compliant");
        ReviewOutcome {
            quality_score: 0.0,
            compliance_status: ComplianceStatus::NonCompliant,
            review_outcome: ReviewVerdict::MajorRevisionRequired,
            issues: vec!["review outcome could not be parsed".to_string()],
            recommendations: Vec::new(),
        }
    })
}

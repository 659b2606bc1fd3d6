//! End-to-end workflow runs against scripted role handlers.
//!
//! Every test wires a real bus, real coordinator, and real worker loops; only
//! the LLM behind each role is replaced by a canned handler.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use patentsmith_core::bus::MessageBus;
use patentsmith_core::config::WorkflowConfig;
use patentsmith_core::context::ContextManager;
use patentsmith_core::output::{FileSink, MemorySink};
use patentsmith_core::workers::{RoleHandler, TaskRequest, Worker};
use patentsmith_core::workflow::{
    compile, Coordinator, StageStatus, WorkflowEventKind, WorkflowSnapshot, WorkflowStatus,
};

// ------------------------------------------------------------------
// Scripted handlers
// ------------------------------------------------------------------

/// Always answers with the same payload
struct Canned(Value);

#[async_trait::async_trait]
impl RoleHandler for Canned {
    async fn handle(&self, _request: &TaskRequest) -> Result<Value> {
        Ok(self.0.clone())
    }
}

/// Pops scripted answers in order, then repeats the last one
struct Sequenced {
    responses: Mutex<Vec<Value>>,
    fallback: Value,
}

impl Sequenced {
    fn new(responses: Vec<Value>, fallback: Value) -> Self {
        Self {
            responses: Mutex::new(responses),
            fallback,
        }
    }
}

#[async_trait::async_trait]
impl RoleHandler for Sequenced {
    async fn handle(&self, _request: &TaskRequest) -> Result<Value> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(self.fallback.clone())
        } else {
            Ok(responses.remove(0))
        }
    }
}

/// Answers scripted responses in order, then fails every later call
struct ScriptedThenFails {
    responses: Mutex<Vec<Value>>,
}

impl ScriptedThenFails {
    fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }
}

#[async_trait::async_trait]
impl RoleHandler for ScriptedThenFails {
    async fn handle(&self, _request: &TaskRequest) -> Result<Value> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            anyhow::bail!("review backend down");
        }
        Ok(responses.remove(0))
    }
}

/// Fails every call with the same message
struct AlwaysFails(&'static str);

#[async_trait::async_trait]
impl RoleHandler for AlwaysFails {
    async fn handle(&self, _request: &TaskRequest) -> Result<Value> {
        anyhow::bail!("{}", self.0)
    }
}

/// Sleeps past the stage timeout on the first call, answers promptly after
struct SlowFirstCall {
    calls: AtomicU32,
    delay: Duration,
    payload: Value,
}

#[async_trait::async_trait]
impl RoleHandler for SlowFirstCall {
    async fn handle(&self, _request: &TaskRequest) -> Result<Value> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.payload.clone())
    }
}

// ------------------------------------------------------------------
// Canned artifacts
// ------------------------------------------------------------------

fn strategy() -> Value {
    json!({
        "innovation_areas": ["adaptive duty cycling", "thermal gradient sensing"],
        "phases": [
            {"name": "claim mapping", "objective": "map innovation areas to claims"},
            {"name": "drafting", "objective": "produce the full specification"}
        ],
        "risk_factors": ["crowded prior art in battery management"],
        "timeline": "two weeks",
        "success_probability": 0.8
    })
}

fn search_report() -> Value {
    json!({
        "records": [{
            "id": "US-2021-014302",
            "title": "Battery pack cooling controller",
            "abstract": "A controller that modulates coolant flow.",
            "relevance": 0.7
        }],
        "risk_assessment": "moderate overlap on coolant control, none on gradient sensing",
        "novelty_score": 0.75
    })
}

fn discussion() -> Value {
    json!({
        "insights": ["gradient sensing is the strongest differentiator"],
        "consensus_points": ["lead with the sensing claim"],
        "next_steps": ["draft independent claim around gradient prediction"]
    })
}

fn draft() -> Value {
    json!({
        "title": "Adaptive Battery Thermal Control With Gradient Prediction",
        "abstract": "A thermal controller predicts intra-pack gradients and adapts duty cycles.",
        "background": "Existing controllers react to bulk temperature only.",
        "summary": "The invention predicts gradients before they form.",
        "detailed_description": "The controller samples distributed sensors and fits a gradient model.",
        "claims": [
            "1. A method of controlling battery temperature comprising predicting a thermal gradient.",
            "2. The method of claim 1 wherein prediction uses distributed sensor fusion."
        ],
        "drawings_description": "FIG. 1 shows the controller topology."
    })
}

fn review_pass() -> Value {
    json!({
        "quality_score": 9.0,
        "compliance_status": "compliant",
        "review_outcome": "approved",
        "issues": []
    })
}

fn review_fail() -> Value {
    json!({
        "quality_score": 5.5,
        "compliance_status": "needs_minor_revision",
        "review_outcome": "needs_revision",
        "issues": ["independent claim is too broad"]
    })
}

fn rewrite() -> Value {
    json!({
        "draft": draft(),
        "changes": ["narrowed the independent claim to sensor-fusion prediction"],
        "improvement_score": 1.5
    })
}

// ------------------------------------------------------------------
// Harness
// ------------------------------------------------------------------

struct Rig {
    bus: Arc<MessageBus>,
    sink: Arc<MemorySink>,
    coordinator: Arc<Coordinator>,
}

fn test_config() -> WorkflowConfig {
    WorkflowConfig {
        stage_timeout_secs: 5,
        retry_delay_secs: 0,
        output_dir: PathBuf::from("out"),
        write_progress: false,
        ..WorkflowConfig::default()
    }
}

fn build_rig(config: WorkflowConfig) -> Rig {
    let bus = Arc::new(MessageBus::new());
    let sink = Arc::new(MemorySink::new());
    let coordinator = Arc::new(Coordinator::new(
        bus.clone(),
        Arc::new(ContextManager::new()),
        sink.clone() as Arc<dyn FileSink>,
        config,
    ));
    Rig {
        bus,
        sink,
        coordinator,
    }
}

fn spawn(rig: &Rig, name: &str, handler: Arc<dyn RoleHandler>) {
    Worker::new(name, vec!["test"], rig.bus.clone(), handler).spawn();
}

/// Spawn all six roles with the given reviewer; the rest answer canned
fn spawn_default_workers(rig: &Rig, reviewer: Arc<dyn RoleHandler>) {
    spawn(rig, "planner", Arc::new(Canned(strategy())));
    spawn(rig, "searcher", Arc::new(Canned(search_report())));
    spawn(rig, "discusser", Arc::new(Canned(discussion())));
    spawn(rig, "writer", Arc::new(Canned(draft())));
    spawn(rig, "reviewer", reviewer);
    spawn(rig, "rewriter", Arc::new(Canned(rewrite())));
}

async fn wait_for_finish(rig: &Rig, workflow_id: &str) -> WorkflowSnapshot {
    for _ in 0..600 {
        if let Some(snapshot) = rig.coordinator.get_workflow_status(workflow_id) {
            if matches!(
                snapshot.overall_status,
                WorkflowStatus::Completed | WorkflowStatus::Error
            ) {
                return snapshot;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("workflow {workflow_id} did not finish in time");
}

fn final_document_path(topic: &str, workflow_id: &str) -> PathBuf {
    PathBuf::from("out").join(compile::document_filename(topic, workflow_id))
}

// ------------------------------------------------------------------
// Scenarios
// ------------------------------------------------------------------

#[tokio::test]
async fn happy_path_single_review_completes() {
    let (tx, mut rx) = mpsc::channel(64);
    let bus = Arc::new(MessageBus::new());
    let sink = Arc::new(MemorySink::new());
    let mut config = test_config();
    config.write_progress = true;
    let coordinator = Arc::new(
        Coordinator::new(
            bus.clone(),
            Arc::new(ContextManager::new()),
            sink.clone() as Arc<dyn FileSink>,
            config,
        )
        .with_event_channel(tx),
    );
    let rig = Rig {
        bus,
        sink,
        coordinator,
    };
    spawn_default_workers(&rig, Arc::new(Canned(review_pass())));

    let id = rig
        .coordinator
        .start_workflow("Adaptive battery thermal control", "Predictive gradient control")
        .unwrap();
    let snapshot = wait_for_finish(&rig, &id).await;

    assert_eq!(snapshot.overall_status, WorkflowStatus::Completed);
    assert_eq!(snapshot.iteration.review_count, 1);
    assert_eq!(snapshot.iteration.rewrite_count, 0);
    assert_eq!(snapshot.iteration.consecutive_failures, 0);
    // Rewrite never ran; the first five stages all completed.
    for stage in &snapshot.stages[..5] {
        assert_eq!(stage.status, StageStatus::Completed, "{}", stage.stage_name);
    }
    assert_eq!(snapshot.stages[5].status, StageStatus::Pending);
    let results = snapshot.results.expect("finished workflow exposes results");
    assert!(results.contains_key("stage_0") && results.contains_key("stage_4"));

    // Final document carries the standard section headings and the claims.
    let doc = rig
        .sink
        .contents(&final_document_path("Adaptive battery thermal control", &id))
        .expect("final document written");
    assert!(doc.contains("专利名称"));
    assert!(doc.contains("权利要求书"));
    assert!(doc.contains("sensor-fusion") || doc.contains("thermal gradient"));

    // Progress files were written per completed stage.
    assert!(rig
        .sink
        .paths()
        .iter()
        .any(|p| p.to_string_lossy().contains("progress.md")));

    // Event stream saw the workflow start and complete.
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind);
    }
    assert!(kinds.contains(&WorkflowEventKind::WorkflowStarted));
    assert!(kinds.contains(&WorkflowEventKind::WorkflowCompleted));
    assert!(!kinds.contains(&WorkflowEventKind::ReviewRejected));
}

#[tokio::test]
async fn rejected_review_triggers_one_rewrite_cycle() {
    let rig = build_rig(test_config());
    spawn_default_workers(
        &rig,
        Arc::new(Sequenced::new(vec![review_fail()], review_pass())),
    );

    let id = rig
        .coordinator
        .start_workflow("Gradient prediction", "desc")
        .unwrap();
    let snapshot = wait_for_finish(&rig, &id).await;

    assert_eq!(snapshot.overall_status, WorkflowStatus::Completed);
    assert_eq!(snapshot.iteration.review_count, 2);
    assert_eq!(snapshot.iteration.rewrite_count, 1);
    // The second review passed, so the failure streak was cleared.
    assert_eq!(snapshot.iteration.consecutive_failures, 0);
    assert_eq!(snapshot.stages[5].status, StageStatus::Completed);
    assert_eq!(snapshot.stages[4].executions, 2);
}

#[tokio::test]
async fn persistent_rejection_forces_completion_at_review_cap() {
    let rig = build_rig(test_config());
    spawn_default_workers(&rig, Arc::new(Canned(review_fail())));

    let id = rig
        .coordinator
        .start_workflow("Stubborn draft", "desc")
        .unwrap();
    let snapshot = wait_for_finish(&rig, &id).await;

    // Never an error outcome: the caps settle for the best available draft.
    assert_eq!(snapshot.overall_status, WorkflowStatus::Completed);
    assert!(snapshot.iteration.review_count <= 3);
    assert!(snapshot.iteration.rewrite_count <= 3);
    assert_eq!(snapshot.iteration.review_count, 3);
    assert!(snapshot.iteration.warnings.review_limit_approaching);

    let doc = rig
        .sink
        .contents(&final_document_path("Stubborn draft", &id))
        .expect("forced completion still writes the document");
    assert!(doc.contains("专利申请草案"));
}

#[tokio::test]
async fn timed_out_stage_is_retried_once() {
    let mut config = test_config();
    config.stage_timeout_secs = 1;
    let rig = build_rig(config);

    spawn(&rig, "planner", Arc::new(Canned(strategy())));
    spawn(&rig, "searcher", Arc::new(Canned(search_report())));
    spawn(&rig, "discusser", Arc::new(Canned(discussion())));
    spawn(
        &rig,
        "writer",
        Arc::new(SlowFirstCall {
            calls: AtomicU32::new(0),
            delay: Duration::from_millis(1500),
            payload: draft(),
        }),
    );
    spawn(&rig, "reviewer", Arc::new(Canned(review_pass())));
    spawn(&rig, "rewriter", Arc::new(Canned(rewrite())));

    let id = rig
        .coordinator
        .start_workflow("Slow writer", "desc")
        .unwrap();
    let snapshot = wait_for_finish(&rig, &id).await;

    assert_eq!(snapshot.overall_status, WorkflowStatus::Completed);
    let drafting = &snapshot.stages[3];
    assert_eq!(drafting.retry_count, 1);
    assert_eq!(drafting.executions, 2);
    assert_eq!(drafting.status, StageStatus::Completed);
}

#[tokio::test]
async fn unavailable_worker_aborts_the_workflow() {
    let rig = build_rig(test_config());
    // Everyone but the planner is up.
    spawn(&rig, "searcher", Arc::new(Canned(search_report())));
    spawn(&rig, "discusser", Arc::new(Canned(discussion())));
    spawn(&rig, "writer", Arc::new(Canned(draft())));
    spawn(&rig, "reviewer", Arc::new(Canned(review_pass())));
    spawn(&rig, "rewriter", Arc::new(Canned(rewrite())));

    let id = rig
        .coordinator
        .start_workflow("No planner", "desc")
        .unwrap();
    let snapshot = wait_for_finish(&rig, &id).await;

    assert_eq!(snapshot.overall_status, WorkflowStatus::Error);
    assert_eq!(snapshot.stages[0].status, StageStatus::Error);
    assert_eq!(snapshot.stages[0].retry_count, 0, "unavailability is not retried");
    assert!(snapshot
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("unavailable"));
    // An error outcome still produces a document shell.
    assert!(rig
        .sink
        .contents(&final_document_path("No planner", &id))
        .is_some());
}

#[tokio::test]
async fn consecutive_failure_cap_forces_completion() {
    let mut config = test_config();
    config.max_consecutive_failures = 1;
    let rig = build_rig(config);
    spawn_default_workers(&rig, Arc::new(Canned(review_fail())));

    let id = rig
        .coordinator
        .start_workflow("Failure streak", "desc")
        .unwrap();
    let snapshot = wait_for_finish(&rig, &id).await;

    // First rejection dispatches a rewrite; the second rejection trips the
    // streak cap and settles.
    assert_eq!(snapshot.overall_status, WorkflowStatus::Completed);
    assert_eq!(snapshot.iteration.review_count, 2);
    assert_eq!(snapshot.iteration.rewrite_count, 1);
    assert_eq!(snapshot.iteration.consecutive_failures, 1);
}

#[tokio::test]
async fn dead_review_stage_settles_for_latest_draft() {
    let rig = build_rig(test_config());
    // One semantic rejection, then the reviewer errors on every later call.
    spawn_default_workers(
        &rig,
        Arc::new(ScriptedThenFails::new(vec![review_fail()])),
    );

    let id = rig
        .coordinator
        .start_workflow("Dying reviewer", "desc")
        .unwrap();
    let snapshot = wait_for_finish(&rig, &id).await;

    // One rewrite was dispatched by the rejection; the dead review after it
    // must not trigger any more.
    assert_eq!(snapshot.overall_status, WorkflowStatus::Completed);
    assert_eq!(snapshot.iteration.review_count, 1);
    assert_eq!(snapshot.iteration.rewrite_count, 1);
    assert!(snapshot.iteration.rewrite_count <= snapshot.iteration.review_count);

    let review = &snapshot.stages[4];
    assert_eq!(review.status, StageStatus::Error);
    assert_eq!(review.retry_count, 1);
    assert!(rig
        .sink
        .contents(&final_document_path("Dying reviewer", &id))
        .is_some());
}

#[tokio::test]
async fn failed_drafting_leaves_no_draft_to_settle_on() {
    let rig = build_rig(test_config());
    spawn(&rig, "planner", Arc::new(Canned(strategy())));
    spawn(&rig, "searcher", Arc::new(Canned(search_report())));
    spawn(&rig, "discusser", Arc::new(Canned(discussion())));
    spawn(&rig, "writer", Arc::new(AlwaysFails("draft synthesis down")));
    spawn(&rig, "reviewer", Arc::new(Canned(review_pass())));
    spawn(&rig, "rewriter", Arc::new(Canned(rewrite())));

    let id = rig
        .coordinator
        .start_workflow("No draft", "desc")
        .unwrap();
    let snapshot = wait_for_finish(&rig, &id).await;

    // Without a draft the review cannot run and nothing can be settled.
    assert_eq!(snapshot.overall_status, WorkflowStatus::Error);
    assert_eq!(snapshot.stages[3].status, StageStatus::Error);
    assert_eq!(snapshot.iteration.rewrite_count, 0);
    assert!(snapshot
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("draft"));
}

#[tokio::test]
async fn failed_middle_stage_advances_after_retry() {
    let rig = build_rig(test_config());
    spawn(&rig, "planner", Arc::new(Canned(strategy())));
    spawn(&rig, "searcher", Arc::new(AlwaysFails("search backend down")));
    spawn(&rig, "discusser", Arc::new(Canned(discussion())));
    spawn(&rig, "writer", Arc::new(Canned(draft())));
    spawn(&rig, "reviewer", Arc::new(Canned(review_pass())));
    spawn(&rig, "rewriter", Arc::new(Canned(rewrite())));

    let id = rig
        .coordinator
        .start_workflow("Degraded search", "desc")
        .unwrap();
    let snapshot = wait_for_finish(&rig, &id).await;

    // Search failed twice and was skipped; the pipeline still finished.
    assert_eq!(snapshot.overall_status, WorkflowStatus::Completed);
    let search = &snapshot.stages[1];
    assert_eq!(search.status, StageStatus::Error);
    assert_eq!(search.retry_count, 1);
    assert_eq!(search.executions, 2);
    assert!(search
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("search backend down"));
    assert_eq!(snapshot.stages[3].status, StageStatus::Completed);
}

#[tokio::test]
async fn concurrent_workflows_keep_independent_records() {
    let rig = build_rig(test_config());
    spawn_default_workers(&rig, Arc::new(Canned(review_pass())));

    let first = rig
        .coordinator
        .start_workflow("Topic one", "desc one")
        .unwrap();
    let second = rig
        .coordinator
        .start_workflow("Topic two", "desc two")
        .unwrap();
    assert_ne!(first, second);

    let snap_one = wait_for_finish(&rig, &first).await;
    let snap_two = wait_for_finish(&rig, &second).await;
    assert_eq!(snap_one.overall_status, WorkflowStatus::Completed);
    assert_eq!(snap_two.overall_status, WorkflowStatus::Completed);
    assert_eq!(snap_one.topic, "Topic one");
    assert_eq!(snap_two.topic, "Topic two");
    assert!(rig
        .sink
        .contents(&final_document_path("Topic one", &first))
        .is_some());
    assert!(rig
        .sink
        .contents(&final_document_path("Topic two", &second))
        .is_some());
}

#[tokio::test]
async fn stop_rejects_new_workflows_and_unregisters_workers() {
    let rig = build_rig(test_config());
    spawn_default_workers(&rig, Arc::new(Canned(review_pass())));

    let id = rig
        .coordinator
        .start_workflow("Before stop", "desc")
        .unwrap();
    wait_for_finish(&rig, &id).await;

    rig.coordinator.stop();
    assert!(rig.coordinator.start_workflow("After stop", "desc").is_err());
    assert!(rig.bus.worker_names().is_empty());

    // Finished state stays queryable after shutdown.
    let snapshot = rig.coordinator.get_workflow_status(&id).unwrap();
    assert_eq!(snapshot.overall_status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn snapshot_is_stable_between_calls() {
    let rig = build_rig(test_config());
    spawn_default_workers(&rig, Arc::new(Canned(review_pass())));

    let id = rig
        .coordinator
        .start_workflow("Stable snapshot", "desc")
        .unwrap();
    let first = wait_for_finish(&rig, &id).await;
    let second = rig.coordinator.get_workflow_status(&id).unwrap();
    assert_eq!(first, second);
}

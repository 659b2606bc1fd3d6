//! # Staged Workflow
//!
//! Everything that turns a topic into a finished patent draft: the fixed
//! six-stage pipeline definition, per-workflow state, the coordinator that
//! drives it, lifecycle events, and final document compilation.

pub mod compile;
pub mod coordinator;
pub mod events;
pub mod stages;
pub mod state;

pub use coordinator::{Coordinator, COORDINATOR_NAME};
pub use events::{WorkflowEvent, WorkflowEventKind};
pub use stages::StageKind;
pub use state::{
    IterationPhase, IterationState, StageStatus, Workflow, WorkflowSnapshot, WorkflowStatus,
};

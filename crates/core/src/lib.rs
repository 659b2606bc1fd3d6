//! # Patentsmith Core
//!
//! The "Brain" of the Patentsmith system - contains the staged drafting
//! workflow, the in-process message bus, and the six LLM role workers.
//!
//! ## Architecture
//!
//! - `bus/` - In-process message bus (mailboxes, statuses, broadcast)
//! - `workers/` - Role workers (Planner, Searcher, Discusser, Writer, Reviewer, Rewriter)
//! - `workflow/` - Coordinator, stage pipeline, review loop, compilation
//! - `context/` - Shared theme, terminology, and consistency validation
//! - `generator` - LLM backend abstraction (HTTP or scripted)
//! - `output` - File sinks for the final document and progress files
//!
//! ## Usage
//!
//! ```rust,ignore
//! use patentsmith_core::prelude::*;
//!
//! let bus = Arc::new(MessageBus::new());
//! let context = Arc::new(ContextManager::new());
//! let sink: Arc<dyn FileSink> = Arc::new(FsSink::new());
//! spawn_role_workers(&bus, &generator);
//! let coordinator = Arc::new(Coordinator::new(bus, context, sink, WorkflowConfig::default()));
//! let id = coordinator.start_workflow("Adaptive battery thermal control", "...")?;
//! ```

pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod generator;
pub mod output;
pub mod workers;
pub mod workflow;

pub use config::WorkflowConfig;
pub use error::StageError;

/// One-stop imports for embedding the drafting system
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::bus::{Message, MessageBus, MessageKind, WorkerStatus};
    pub use crate::config::WorkflowConfig;
    pub use crate::context::{ContextManager, ContextType};
    pub use crate::error::StageError;
    pub use crate::generator::{Generator, GeneratorConfig, HttpGenerator, StaticGenerator};
    pub use crate::output::{FileSink, FsSink, MemorySink};
    pub use crate::workers::{spawn_role_workers, StageTask, TaskRequest, TaskStatus};
    pub use crate::workflow::{
        Coordinator, StageKind, WorkflowEvent, WorkflowEventKind, WorkflowSnapshot,
        WorkflowStatus,
    };
}

//! # Stage Errors

use thiserror::Error;

/// Failure of a single dispatched stage, as seen by the coordinator
#[derive(Debug, Error)]
pub enum StageError {
    /// Target worker is unregistered, offline, or errored at dispatch time.
    /// Never retried; recovery is via re-registration.
    #[error("worker '{worker}' is unavailable")]
    WorkerUnavailable { worker: String },

    /// No completion arrived for the stage's task_id within the timeout
    #[error("stage '{stage}' timed out after {seconds}s")]
    Timeout { stage: String, seconds: u64 },

    /// The worker reported `success = false` or the completion channel broke
    #[error("stage '{stage}' failed: {reason}")]
    TaskFailed { stage: String, reason: String },
}

impl StageError {
    /// Whether the coordinator's single-retry rule applies
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StageError::WorkerUnavailable { .. })
    }
}

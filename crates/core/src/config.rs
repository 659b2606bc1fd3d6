//! # Workflow Configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Knobs for the coordinator's pipeline and review–rewrite loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Hard cap on Quality Review invocations per workflow
    pub max_reviews: u32,
    /// Hard cap on Rewrite invocations per workflow
    pub max_rewrites: u32,
    /// Quality score threshold for accepting a review
    pub target_quality_score: f64,
    /// Forces completion when this many reviews fail back-to-back
    pub max_consecutive_failures: u32,
    /// Per-stage wall-clock timeout, measured from dispatch
    pub stage_timeout_secs: u64,
    /// Delay between a stage error and its single retry
    pub retry_delay_secs: u64,
    /// Root directory for persisted outputs
    pub output_dir: PathBuf,
    /// Run a brief Discussion pass after each Rewrite to validate direction
    #[serde(default)]
    pub discuss_after_rewrite: bool,
    /// Write per-stage progress files alongside the final document
    #[serde(default = "default_true")]
    pub write_progress: bool,
}

fn default_true() -> bool {
    true
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_reviews: 3,
            max_rewrites: 3,
            target_quality_score: 8.0,
            max_consecutive_failures: 2,
            stage_timeout_secs: 180,
            retry_delay_secs: 5,
            output_dir: PathBuf::from("output"),
            discuss_after_rewrite: false,
            write_progress: true,
        }
    }
}

impl WorkflowConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkflowConfig::default();
        assert_eq!(config.max_reviews, 3);
        assert_eq!(config.max_rewrites, 3);
        assert_eq!(config.target_quality_score, 8.0);
        assert_eq!(config.max_consecutive_failures, 2);
        assert_eq!(config.stage_timeout(), Duration::from_secs(180));
        assert_eq!(config.retry_delay(), Duration::from_secs(5));
        assert!(!config.discuss_after_rewrite);
        assert!(config.write_progress);
    }
}

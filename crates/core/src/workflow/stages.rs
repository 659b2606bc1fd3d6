//! # Stage Table
//!
//! The fixed six-stage pipeline and its stage → worker and stage → context
//! mappings.

use serde::{Deserialize, Serialize};

use crate::context::ContextType;

/// One of the six pipeline stages. Closed set; the review–rewrite loop
/// revisits `Review`/`Rewrite` (and optionally `Discussion`) but never adds
/// stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Planning,
    Search,
    Discussion,
    Drafting,
    Review,
    Rewrite,
}

impl StageKind {
    /// The pipeline in dispatch order
    pub const PIPELINE: [StageKind; 6] = [
        StageKind::Planning,
        StageKind::Search,
        StageKind::Discussion,
        StageKind::Drafting,
        StageKind::Review,
        StageKind::Rewrite,
    ];

    /// Index of the Review stage in [`Self::PIPELINE`]
    pub const REVIEW_INDEX: usize = 4;
    /// Index of the Rewrite stage in [`Self::PIPELINE`]
    pub const REWRITE_INDEX: usize = 5;
    /// Index of the Discussion stage in [`Self::PIPELINE`]
    pub const DISCUSSION_INDEX: usize = 2;

    /// Human-readable stage name
    pub fn stage_name(self) -> &'static str {
        match self {
            StageKind::Planning => "Planning & Strategy",
            StageKind::Search => "Prior Art Search",
            StageKind::Discussion => "Innovation Discussion",
            StageKind::Drafting => "Patent Drafting",
            StageKind::Review => "Quality Review",
            StageKind::Rewrite => "Final Rewrite",
        }
    }

    /// Name of the worker that executes this stage
    pub fn worker_name(self) -> &'static str {
        match self {
            StageKind::Planning => "planner",
            StageKind::Search => "searcher",
            StageKind::Discussion => "discusser",
            StageKind::Drafting => "writer",
            StageKind::Review => "reviewer",
            StageKind::Rewrite => "rewriter",
        }
    }

    /// Context types fetched from the context manager for this stage
    pub fn needed_context(self) -> &'static [ContextType] {
        use ContextType::*;
        match self {
            StageKind::Planning => &[ThemeDefinition, TechnicalDomain],
            StageKind::Search => &[ThemeDefinition, TechnicalDomain, Terminology],
            StageKind::Discussion => &[ThemeDefinition, InnovationPoints, PriorArt],
            StageKind::Drafting => &[
                ThemeDefinition,
                TechnicalDomain,
                Terminology,
                InnovationPoints,
                PriorArt,
                ClaimsFocus,
            ],
            StageKind::Review => &[ThemeDefinition, ClaimsFocus, Terminology],
            StageKind::Rewrite => &[
                ThemeDefinition,
                TechnicalDomain,
                InnovationPoints,
                Terminology,
                ClaimsFocus,
            ],
        }
    }
}

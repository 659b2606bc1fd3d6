//! # Theme & Context Items
//!
//! The canonical theme record and the typed context items threaded across
//! stages.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of context item types.
///
/// Free-form string typing from ad-hoc pipelines is deliberately avoided:
/// stage views are declared against this enum and checked at compile time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    ThemeDefinition,
    TechnicalDomain,
    Terminology,
    InnovationPoints,
    PriorArt,
    ClaimsFocus,
}

impl ContextType {
    /// All six context types, in declaration order
    pub fn all() -> [ContextType; 6] {
        [
            ContextType::ThemeDefinition,
            ContextType::TechnicalDomain,
            ContextType::Terminology,
            ContextType::InnovationPoints,
            ContextType::PriorArt,
            ContextType::ClaimsFocus,
        ]
    }
}

/// Canonical topic record, created once per workflow and read-only thereafter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeDefinition {
    /// Canonical title derived from the user topic
    pub primary_title: String,
    /// Core concept derived from the user description
    pub core_concept: String,
    /// Accepted synonyms for the title
    #[serde(default)]
    pub synonyms: BTreeSet<String>,
    /// Technical domain label
    pub domain: String,
}

/// One typed entry in the workflow's context store.
///
/// Items are appended, never mutated; readers see the most recent entry per
/// `(context_type, key)` by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub context_type: ContextType,
    pub key: String,
    pub value: serde_json::Value,
    pub source_worker: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl ContextItem {
    pub fn new(
        context_type: ContextType,
        key: impl Into<String>,
        value: serde_json::Value,
        source_worker: &str,
    ) -> Self {
        Self {
            context_type,
            key: key.into(),
            value,
            source_worker: source_worker.to_string(),
            timestamp: Utc::now(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }
}

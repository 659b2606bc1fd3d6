//! # Context Manager
//!
//! Workflow-scoped typed key/value store. Threads the canonical theme,
//! terminology, prior-art findings, innovation points, and claim focus across
//! stages, and validates each stage's output for consistency.
//!
//! The manager never blocks the pipeline on its own errors: every method
//! degrades to "no change, log warning" when something is off.

pub mod theme;
pub mod validation;

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde_json::Value;

use crate::workflow::stages::StageKind;

pub use theme::{ContextItem, ContextType, ThemeDefinition};
pub use validation::ConsistencyReport;

/// Stage-scoped view: latest value per key, grouped by context type
pub type ContextView = BTreeMap<ContextType, BTreeMap<String, Value>>;

struct WorkflowContext {
    theme: ThemeDefinition,
    items: Vec<ContextItem>,
}

/// Per-workflow context store. An explicit collaborator of the coordinator;
/// multiple managers may coexist in one process.
pub struct ContextManager {
    records: Mutex<HashMap<String, WorkflowContext>>,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextManager {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Create the workflow record and derive its theme.
    ///
    /// `primary_title` comes from the topic, `core_concept` from the
    /// description; synonyms start empty and the domain is inferred from the
    /// brief. The theme is read-only afterwards.
    pub fn initialize(&self, workflow_id: &str, topic: &str, description: &str) -> ThemeDefinition {
        let theme = ThemeDefinition {
            primary_title: topic.trim().to_string(),
            core_concept: description.trim().to_string(),
            synonyms: Default::default(),
            domain: infer_domain(topic, description),
        };

        let seed = vec![
            ContextItem::new(
                ContextType::ThemeDefinition,
                "theme",
                serde_json::to_value(&theme).unwrap_or(Value::Null),
                "coordinator",
            ),
            ContextItem::new(
                ContextType::TechnicalDomain,
                "domain",
                Value::String(theme.domain.clone()),
                "coordinator",
            ),
        ];

        let mut records = self.records.lock().unwrap();
        records.insert(
            workflow_id.to_string(),
            WorkflowContext {
                theme: theme.clone(),
                items: seed,
            },
        );
        theme
    }

    /// The workflow's theme, if initialized
    pub fn theme(&self, workflow_id: &str) -> Option<ThemeDefinition> {
        let records = self.records.lock().unwrap();
        records.get(workflow_id).map(|ctx| ctx.theme.clone())
    }

    /// Append a context item. Items with the same `(context_type, key)` do not
    /// replace older ones; readers see the most recent by timestamp.
    pub fn add_item(&self, workflow_id: &str, item: ContextItem) {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(workflow_id) {
            Some(ctx) => ctx.items.push(item),
            None => {
                tracing::warn!(workflow_id, "add_item for unknown workflow, dropped");
            }
        }
    }

    /// Return items whose type is in `needed_types`, grouped by type with the
    /// latest value per key.
    pub fn view(
        &self,
        workflow_id: &str,
        worker_name: &str,
        needed_types: &[ContextType],
    ) -> ContextView {
        let records = self.records.lock().unwrap();
        let Some(ctx) = records.get(workflow_id) else {
            tracing::warn!(workflow_id, worker_name, "context view for unknown workflow");
            return ContextView::new();
        };

        let mut view = ContextView::new();
        for item in &ctx.items {
            if !needed_types.contains(&item.context_type) {
                continue;
            }
            // Items are appended in timestamp order, so later inserts win.
            view.entry(item.context_type)
                .or_default()
                .insert(item.key.clone(), item.value.clone());
        }
        view
    }

    /// Validate a stage output against the theme and established terminology.
    ///
    /// Inconsistencies are recorded as `theme_definition` items keyed
    /// `consistency_issue_<stage>`; validation never fails the stage.
    pub fn validate(
        &self,
        workflow_id: &str,
        worker_name: &str,
        output_text: &str,
        output_type: &str,
    ) -> ConsistencyReport {
        let (theme, terms) = {
            let records = self.records.lock().unwrap();
            match records.get(workflow_id) {
                Some(ctx) => {
                    let terms: Vec<String> = ctx
                        .items
                        .iter()
                        .filter(|i| i.context_type == ContextType::Terminology)
                        .map(|i| i.key.clone())
                        .collect();
                    (ctx.theme.clone(), terms)
                }
                None => {
                    tracing::warn!(workflow_id, "validate for unknown workflow");
                    return ConsistencyReport {
                        is_consistent: true,
                        score: 1.0,
                        issues: Vec::new(),
                    };
                }
            }
        };

        let report = validation::check_consistency(&theme, &terms, output_text);
        if !report.is_consistent {
            tracing::warn!(
                workflow_id,
                worker_name,
                output_type,
                score = report.score,
                "stage output inconsistent with theme"
            );
            self.add_item(
                workflow_id,
                ContextItem::new(
                    ContextType::ThemeDefinition,
                    format!("consistency_issue_{output_type}"),
                    serde_json::json!({
                        "worker": worker_name,
                        "score": report.score,
                        "issues": report.issues,
                    }),
                    worker_name,
                ),
            );
        }
        report
    }

    /// Pull stage-specific fields out of a completed stage's result into new
    /// context items: innovation areas from planning, prior-art summaries from
    /// search, insights from discussion, claims and terminology from drafts,
    /// issues from review.
    pub fn extract_from_result(
        &self,
        workflow_id: &str,
        stage_index: usize,
        result: &Value,
        stage: StageKind,
    ) {
        let source = stage.worker_name();
        match stage {
            StageKind::Planning => {
                for (i, area) in str_array(result, "innovation_areas").iter().enumerate() {
                    self.add_item(
                        workflow_id,
                        ContextItem::new(
                            ContextType::InnovationPoints,
                            format!("area_{i}"),
                            Value::String(area.clone()),
                            source,
                        ),
                    );
                }
            }
            StageKind::Search => {
                if let Some(records) = result.get("records").and_then(Value::as_array) {
                    for (i, record) in records.iter().enumerate() {
                        let key = record
                            .get("id")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("prior_art_{i}"));
                        let relevance = record
                            .get("relevance")
                            .and_then(Value::as_f64)
                            .unwrap_or(0.0) as f32;
                        self.add_item(
                            workflow_id,
                            ContextItem::new(ContextType::PriorArt, key, record.clone(), source)
                                .with_confidence(relevance),
                        );
                    }
                }
                if let Some(score) = result.get("novelty_score") {
                    self.add_item(
                        workflow_id,
                        ContextItem::new(
                            ContextType::PriorArt,
                            "novelty_score",
                            score.clone(),
                            source,
                        ),
                    );
                }
            }
            StageKind::Discussion => {
                for (i, insight) in str_array(result, "insights").iter().enumerate() {
                    self.add_item(
                        workflow_id,
                        ContextItem::new(
                            ContextType::InnovationPoints,
                            format!("insight_{stage_index}_{i}"),
                            Value::String(insight.clone()),
                            source,
                        ),
                    );
                }
            }
            StageKind::Drafting | StageKind::Rewrite => {
                // Rewrite wraps the draft one level down.
                let draft = if stage == StageKind::Rewrite {
                    result.get("draft").unwrap_or(result)
                } else {
                    result
                };
                for (i, claim) in str_array(draft, "claims").iter().enumerate() {
                    self.add_item(
                        workflow_id,
                        ContextItem::new(
                            ContextType::ClaimsFocus,
                            format!("claim_{}", i + 1),
                            Value::String(claim.clone()),
                            source,
                        ),
                    );
                }
                if let Some(title) = draft.get("title").and_then(Value::as_str) {
                    for term in significant_terms(title) {
                        self.add_item(
                            workflow_id,
                            ContextItem::new(
                                ContextType::Terminology,
                                term,
                                Value::String("draft_title".to_string()),
                                source,
                            ),
                        );
                    }
                }
            }
            StageKind::Review => {
                for (i, issue) in str_array(result, "issues").iter().enumerate() {
                    self.add_item(
                        workflow_id,
                        ContextItem::new(
                            ContextType::ThemeDefinition,
                            format!("review_issue_{stage_index}_{i}"),
                            Value::String(issue.clone()),
                            source,
                        ),
                    );
                }
            }
        }
    }
}

fn str_array(value: &Value, field: &str) -> Vec<String> {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Distinctive lowercase terms from a title; short and common words skipped
fn significant_terms(text: &str) -> Vec<String> {
    const STOPWORDS: &[&str] = &[
        "system", "method", "device", "apparatus", "based", "using", "through",
        "between", "toward", "within",
    ];
    let mut terms: Vec<String> = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let w = word.to_lowercase();
        if w.len() >= 6 && !STOPWORDS.contains(&w.as_str()) && !terms.contains(&w) {
            terms.push(w);
        }
        if terms.len() >= 8 {
            break;
        }
    }
    terms
}

/// Coarse domain label from the user brief
fn infer_domain(topic: &str, description: &str) -> String {
    let text = format!("{} {}", topic, description).to_lowercase();
    let table: &[(&[&str], &str)] = &[
        (
            &["neural", "machine learning", "model", "rag", "llm", "intelligen", "agent"],
            "artificial_intelligence",
        ),
        (&["network", "protocol", "wireless", "communicat"], "communications"),
        (&["battery", "energy", "power", "charging"], "energy"),
        (&["medical", "diagnos", "biolog", "gene"], "biomedical"),
        (&["semiconductor", "chip", "circuit", "wafer"], "microelectronics"),
        (&["data", "storage", "database", "retrieval", "index"], "information_technology"),
    ];
    for (needles, domain) in table {
        if needles.iter().any(|n| text.contains(n)) {
            return domain.to_string();
        }
    }
    "general_technology".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_initialize_derives_theme() {
        let mgr = ContextManager::new();
        let theme = mgr.initialize("wf1", "Evidence-Graph RAG", "RAG with cross-doc evidence graph");
        assert_eq!(theme.primary_title, "Evidence-Graph RAG");
        assert_eq!(theme.domain, "artificial_intelligence");
        assert!(theme.synonyms.is_empty());

        let view = mgr.view("wf1", "planner", &[ContextType::ThemeDefinition]);
        assert!(view[&ContextType::ThemeDefinition].contains_key("theme"));
    }

    #[test]
    fn test_latest_per_key_wins() {
        let mgr = ContextManager::new();
        mgr.initialize("wf1", "T", "D");
        mgr.add_item(
            "wf1",
            ContextItem::new(ContextType::Terminology, "graph", json!("v1"), "planner"),
        );
        mgr.add_item(
            "wf1",
            ContextItem::new(ContextType::Terminology, "graph", json!("v2"), "writer"),
        );

        let view = mgr.view("wf1", "reviewer", &[ContextType::Terminology]);
        assert_eq!(view[&ContextType::Terminology]["graph"], json!("v2"));
    }

    #[test]
    fn test_view_filters_types() {
        let mgr = ContextManager::new();
        mgr.initialize("wf1", "T", "D");
        mgr.add_item(
            "wf1",
            ContextItem::new(ContextType::PriorArt, "pa_1", json!({}), "searcher"),
        );

        let view = mgr.view("wf1", "planner", &[ContextType::InnovationPoints]);
        assert!(view.is_empty());
    }

    #[test]
    fn test_add_item_unknown_workflow_is_noop() {
        let mgr = ContextManager::new();
        mgr.add_item(
            "missing",
            ContextItem::new(ContextType::PriorArt, "k", json!(1), "searcher"),
        );
        assert!(mgr.theme("missing").is_none());
    }

    #[test]
    fn test_validate_records_issue_item() {
        let mgr = ContextManager::new();
        mgr.initialize("wf1", "Evidence-Graph RAG", "desc");

        let report = mgr.validate("wf1", "writer", "totally unrelated text", "draft");
        assert!(!report.is_consistent);

        let view = mgr.view("wf1", "coordinator", &[ContextType::ThemeDefinition]);
        assert!(view[&ContextType::ThemeDefinition].contains_key("consistency_issue_draft"));
    }

    #[test]
    fn test_extract_from_planning() {
        let mgr = ContextManager::new();
        mgr.initialize("wf1", "T", "D");
        let result = json!({ "innovation_areas": ["graph pruning", "claim scoring"] });
        mgr.extract_from_result("wf1", 0, &result, StageKind::Planning);

        let view = mgr.view("wf1", "discusser", &[ContextType::InnovationPoints]);
        assert_eq!(view[&ContextType::InnovationPoints].len(), 2);
    }

    #[test]
    fn test_extract_from_search_carries_relevance() {
        let mgr = ContextManager::new();
        mgr.initialize("wf1", "T", "D");
        let result = json!({
            "records": [{"id": "US123", "title": "Prior", "abstract": "a", "relevance": 0.7}],
            "novelty_score": 8.1,
        });
        mgr.extract_from_result("wf1", 1, &result, StageKind::Search);

        let view = mgr.view("wf1", "writer", &[ContextType::PriorArt]);
        assert!(view[&ContextType::PriorArt].contains_key("US123"));
        assert!(view[&ContextType::PriorArt].contains_key("novelty_score"));
    }

    #[test]
    fn test_extract_claims_from_rewrite_result() {
        let mgr = ContextManager::new();
        mgr.initialize("wf1", "T", "D");
        let result = json!({
            "draft": { "title": "Adaptive Evidence Indexing Engine", "claims": ["1. A method..."] },
            "changes": ["tightened claim 1"],
            "improvement_score": 1.5,
        });
        mgr.extract_from_result("wf1", 5, &result, StageKind::Rewrite);

        let view = mgr.view("wf1", "reviewer", &[ContextType::ClaimsFocus, ContextType::Terminology]);
        assert!(view[&ContextType::ClaimsFocus].contains_key("claim_1"));
        assert!(view[&ContextType::Terminology].contains_key("adaptive"));
    }

    #[test]
    fn test_infer_domain_fallback() {
        assert_eq!(infer_domain("Folding chair", "a chair that folds"), "general_technology");
    }
}

//! # Document Compilation
//!
//! Turns a finished workflow into the final Markdown application document,
//! with the standard CN application section labels, plus the per-stage
//! progress fragments written along the way.

use std::path::PathBuf;

use serde_json::Value;

use super::stages::StageKind;
use super::state::{StageStatus, Workflow};
use crate::output::sanitize_topic;
use crate::workers::Draft;

/// Final document file name: `<sanitized_topic>_<workflow_id[:8]>.md`
pub fn document_filename(topic: &str, workflow_id: &str) -> String {
    format!("{}_{}.md", sanitize_topic(topic), id_prefix(workflow_id))
}

/// Progress directory name for a workflow
pub fn progress_dirname(topic: &str, workflow_id: &str) -> PathBuf {
    PathBuf::from("progress").join(format!(
        "{}_{}",
        sanitize_topic(topic),
        id_prefix(workflow_id)
    ))
}

fn id_prefix(workflow_id: &str) -> &str {
    &workflow_id[..workflow_id.len().min(8)]
}

/// Render the full application document.
///
/// Always renders a header; the draft sections appear when a draft exists,
/// and the appendix lists whatever stage results were recorded. Partial
/// workflows therefore still yield a file.
pub fn final_document(workflow: &Workflow) -> String {
    let mut doc = String::new();
    doc.push_str(&format!("# 专利申请草案：{}\n\n", workflow.topic));
    doc.push_str(&format!(
        "- Workflow: `{}`\n- Status: {:?}\n- Started: {}\n",
        workflow.workflow_id,
        workflow.overall_status,
        workflow.start_time.to_rfc3339(),
    ));
    if let Some(end) = workflow.end_time {
        doc.push_str(&format!("- Finished: {}\n", end.to_rfc3339()));
    }
    if let Some(error) = &workflow.last_error {
        doc.push_str(&format!("- Last error: {error}\n"));
    }
    doc.push('\n');

    if let Some(draft) = workflow.latest_draft() {
        doc.push_str(&draft_sections(&draft));
    }

    doc.push_str(&appendix(workflow));
    doc
}

fn draft_sections(draft: &Draft) -> String {
    let mut out = String::new();
    out.push_str(&format!("## 专利名称 (Title)\n\n{}\n\n", draft.title));
    out.push_str(&format!("## 说明书摘要 (Abstract)\n\n{}\n\n", draft.abstract_text));
    out.push_str(&format!("## 背景技术 (Background)\n\n{}\n\n", draft.background));
    out.push_str(&format!("## 发明内容 (Summary)\n\n{}\n\n", draft.summary));
    out.push_str(&format!(
        "## 具体实施方式 (Detailed Description)\n\n{}\n\n",
        draft.detailed_description
    ));

    out.push_str("## 权利要求书 (Claims)\n\n");
    for (i, claim) in draft.claims.iter().enumerate() {
        // Claims usually arrive pre-numbered; only number the bare ones.
        let text = claim.trim();
        if text.starts_with(|c: char| c.is_ascii_digit()) {
            out.push_str(&format!("{text}\n\n"));
        } else {
            out.push_str(&format!("{}. {text}\n\n", i + 1));
        }
    }

    out.push_str(&format!(
        "## 附图说明 (Drawings Description)\n\n{}\n\n",
        draft.drawings_description
    ));
    if !draft.technical_diagrams.is_empty() {
        out.push_str("## 技术图示 (Technical Diagrams)\n\n");
        for diagram in &draft.technical_diagrams {
            out.push_str(&format!("- {diagram}\n"));
        }
        out.push('\n');
    }
    out
}

fn appendix(workflow: &Workflow) -> String {
    let mut out = String::from("## 附录：各阶段输出 (Stage Appendix)\n\n");
    for (index, stage) in workflow.stages.iter().enumerate() {
        let Some(result) = workflow.stage_result(index) else {
            continue;
        };
        out.push_str(&format!(
            "### {} ({})\n\n```json\n{}\n```\n\n",
            stage.kind.stage_name(),
            stage.worker_name,
            serde_json::to_string_pretty(result).unwrap_or_default(),
        ));
    }
    out
}

/// Render one stage's progress fragment
pub fn stage_fragment(kind: StageKind, status: StageStatus, result: &Value) -> String {
    format!(
        "## {} — {:?}\n\n```json\n{}\n```\n\n",
        kind.stage_name(),
        status,
        serde_json::to_string_pretty(result).unwrap_or_default(),
    )
}

//! # Consistency Validation
//!
//! Checks stage outputs against the workflow theme and established
//! terminology. A failed check never fails the stage; it only annotates the
//! context.

use serde::Serialize;

use super::theme::ThemeDefinition;

/// Result of validating a stage output against the theme
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub is_consistent: bool,
    /// Score in [0, 1]: weighted theme reference + terminology usage
    pub score: f64,
    pub issues: Vec<String>,
}

/// Validate `output_text` against the theme and known terminology keys.
///
/// The title check accepts the primary title or any synonym,
/// case-insensitively. Terminology usage is the fraction of established terms
/// that appear in the output (vacuously 1.0 when none exist yet).
pub fn check_consistency(
    theme: &ThemeDefinition,
    terminology: &[String],
    output_text: &str,
) -> ConsistencyReport {
    let haystack = output_text.to_lowercase();
    let mut issues = Vec::new();

    let title_hit = haystack.contains(&theme.primary_title.to_lowercase())
        || theme
            .synonyms
            .iter()
            .any(|s| !s.is_empty() && haystack.contains(&s.to_lowercase()));
    if !title_hit {
        issues.push(format!(
            "output does not reference the primary title '{}' or a known synonym",
            theme.primary_title
        ));
    }

    let term_ratio = if terminology.is_empty() {
        1.0
    } else {
        let hits = terminology
            .iter()
            .filter(|t| haystack.contains(&t.to_lowercase()))
            .count();
        hits as f64 / terminology.len() as f64
    };
    if term_ratio < 0.5 {
        issues.push(format!(
            "output uses {:.0}% of established terminology",
            term_ratio * 100.0
        ));
    }

    let score = (if title_hit { 0.6 } else { 0.0 }) + 0.4 * term_ratio;
    ConsistencyReport {
        is_consistent: title_hit && term_ratio >= 0.5,
        score,
        issues,
    }
}

//! Role system prompts bundled at compile time.
//!
//! Each role worker prepends its prompt to the task payload before calling
//! the generator. Prompt text is deliberately outside the core contract; what
//! matters is the JSON shape each role is instructed to return.

/// Planner - drafting strategy and innovation areas
pub const PLANNER: &str = include_str!("defaults/planner.md");

/// Searcher - prior-art search and novelty scoring
pub const SEARCHER: &str = include_str!("defaults/searcher.md");

/// Discusser - innovation discussion and consensus building
pub const DISCUSSER: &str = include_str!("defaults/discusser.md");

/// Writer - full application draft
pub const WRITER: &str = include_str!("defaults/writer.md");

/// Reviewer - quality and compliance review
pub const REVIEWER: &str = include_str!("defaults/reviewer.md");

/// Rewriter - revision against review feedback
pub const REWRITER: &str = include_str!("defaults/rewriter.md");

/// All role prompts with their worker names
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("planner", PLANNER),
        ("searcher", SEARCHER),
        ("discusser", DISCUSSER),
        ("writer", WRITER),
        ("reviewer", REVIEWER),
        ("rewriter", REWRITER),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_prompts_non_empty() {
        for (role, content) in all_defaults() {
            assert!(!content.is_empty(), "Prompt '{}' should not be empty", role);
            assert!(content.len() > 50, "Prompt '{}' seems too short", role);
        }
    }

    #[test]
    fn test_prompt_count() {
        assert_eq!(all_defaults().len(), 6, "Should have 6 role prompts");
    }
}

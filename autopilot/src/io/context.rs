//! Session context writer for `context.md` (regenerated every session).

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::Environment;
use serde::Serialize;
use tracing::debug;

use crate::core::progress::ParsedProgressEntry;
use crate::core::review::DesignDecision;
use crate::core::scheduler::ProgressSummary;
use crate::io::documents::write_atomic;

const CONTEXT_TEMPLATE: &str = include_str!("prompts/context.md");

/// The feature a session should work on, with what is known about it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextFeatureContext {
    pub id: String,
    pub description: String,
    pub test_command: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub binding_decisions: Vec<DesignDecision>,
    /// Ledger entries for this feature, oldest first.
    pub history: Vec<ParsedProgressEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionContext {
    pub task_name: String,
    pub task_description: String,
    pub summary: ProgressSummary,
    pub next_feature: Option<NextFeatureContext>,
    pub blocked: Vec<String>,
    pub constraints: Vec<String>,
    pub recent_progress: Vec<ParsedProgressEntry>,
}

pub fn render_context(context: &SessionContext) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("context", CONTEXT_TEMPLATE)
        .context("load context template")?;
    let rendered = env
        .get_template("context")?
        .render(context)
        .context("render session context")?;
    Ok(rendered)
}

/// Replace `context.md` with a fresh rendering.
pub async fn write_context(path: &Path, context: &SessionContext) -> Result<()> {
    debug!(
        path = %path.display(),
        next_feature = context.next_feature.as_ref().map_or("", |f| f.id.as_str()),
        "writing session context"
    );
    let rendered = render_context(context)?;
    write_atomic(path, &rendered).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::design_decision;

    fn summary() -> ProgressSummary {
        ProgressSummary {
            passing: 1,
            total: 4,
            in_progress: 0,
            failing: 1,
            blocked: 1,
            percent_complete: 25,
        }
    }

    fn context(next_feature: Option<NextFeatureContext>) -> SessionContext {
        SessionContext {
            task_name: "Login".to_string(),
            task_description: String::new(),
            summary: summary(),
            next_feature,
            blocked: vec!["ft-4".to_string()],
            constraints: Vec::new(),
            recent_progress: Vec::new(),
        }
    }

    #[test]
    fn renders_next_feature_with_attempt_history() {
        let next = NextFeatureContext {
            id: "ft-2".to_string(),
            description: "Reset password".to_string(),
            test_command: "npm test -- reset".to_string(),
            attempts: 1,
            max_attempts: 3,
            last_error: Some("exited with status 1".to_string()),
            binding_decisions: vec![design_decision("dec-1", "state", "Use hooks", &["Redux"])],
            history: vec![ParsedProgressEntry {
                timestamp: "2026-01-01T00:00:00.000Z".to_string(),
                label: "Feature Failed".to_string(),
                body: String::new(),
            }],
        };
        let rendered = render_context(&context(Some(next))).expect("render");
        assert!(rendered.starts_with("# Session Context: Login"));
        assert!(rendered.contains("1/4 features passing (25%)"));
        assert!(rendered.contains("## Next Feature: ft-2"));
        assert!(rendered.contains("- **Attempts:** 1/3"));
        assert!(rendered.contains("- **Last error:** exited with status 1"));
        assert!(rendered.contains("(do not use: Redux)"));
        assert!(rendered.contains("- 2026-01-01T00:00:00.000Z Feature Failed"));
        assert!(rendered.contains("## Blocked\n\n- ft-4"));
    }

    #[test]
    fn renders_without_next_feature() {
        let rendered = render_context(&context(None)).expect("render");
        assert!(rendered.contains("None available."));
        assert!(!rendered.contains("## Constraints"));
    }

    #[tokio::test]
    async fn write_replaces_previous_context() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("context.md");
        std::fs::write(&path, "stale").expect("write stale");
        write_context(&path, &context(None)).await.expect("write");
        let contents = std::fs::read_to_string(&path).expect("read");
        assert!(!contents.contains("stale"));
        assert!(contents.contains("# Session Context"));
    }
}

//! Session start/end bookkeeping.
//!
//! A session hydrates from durable state only: goals, status, the ledger and
//! review history. `context.md` is regenerated for the agent doing the work.

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument};

use crate::core::goals::Feature;
use crate::core::progress::{ProgressEntry, ProgressKind};
use crate::core::scheduler::{
    ProgressSummary, blocked_features, is_task_complete, progress_summary, select_next_feature,
};
use crate::core::status::{TaskStatus, initialize_status, recalculate_milestone_status};
use crate::io::config::EngineConfig;
use crate::io::context::{NextFeatureContext, SessionContext, write_context};
use crate::io::goal_store::require_goals;
use crate::io::paths::TaskPaths;
use crate::io::progress_log::{
    append_progress_entry, init_ledger, read_feature_progress, read_recent_progress,
};
use crate::io::review_store::load_review_history;
use crate::io::status_store::{load_status, save_status};
use crate::select::load_task;

/// What a new session should do.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionInit {
    Ready {
        feature: NextFeatureContext,
        summary: ProgressSummary,
    },
    Complete {
        summary: ProgressSummary,
    },
    /// Nothing is selectable but the task is not complete.
    Blocked {
        summary: ProgressSummary,
        blocked: Vec<String>,
    },
}

impl SessionInit {
    pub fn summary(&self) -> ProgressSummary {
        match self {
            SessionInit::Ready { summary, .. }
            | SessionInit::Complete { summary }
            | SessionInit::Blocked { summary, .. } => *summary,
        }
    }
}

#[instrument(skip_all, fields(task_dir = %paths.task_dir.display()))]
pub async fn initialize_session(paths: &TaskPaths, cfg: &EngineConfig) -> Result<SessionInit> {
    let goals = require_goals(&paths.goals_path).await?;
    let status = match load_status(&paths.status_path).await? {
        Some(status) => status,
        None => initialize_status(&paths.task_id(), &goals, cfg.max_attempts_default),
    };
    let status = recalculate_milestone_status(&status, &goals);
    save_status(&paths.status_path, &status).await?;

    init_ledger(&paths.progress_path, &goals.task_name).await?;
    let recent_progress =
        read_recent_progress(&paths.progress_path, cfg.recent_progress_limit).await?;

    let summary = progress_summary(&goals, &status);
    let blocked = blocked_features(&goals, &status);
    let next_feature = match select_next_feature(&goals, &status) {
        Some(feature) => Some(next_feature_context(paths, &status, feature).await?),
        None => None,
    };

    let start = ProgressEntry::new(ProgressKind::SessionStart, "Session started.")
        .detail(
            "Progress",
            format!(
                "{}/{} features passing ({}%)",
                summary.passing, summary.total, summary.percent_complete
            ),
        )
        .detail_opt("Next feature", next_feature.as_ref().map(|f| f.id.clone()));
    append_progress_entry(&paths.progress_path, &start).await?;

    let context = SessionContext {
        task_name: goals.task_name.clone(),
        task_description: goals.task_description.clone(),
        summary,
        next_feature: next_feature.clone(),
        blocked: blocked.clone(),
        constraints: goals.constraints.clone(),
        recent_progress,
    };
    write_context(&paths.context_path, &context).await?;

    let init = match next_feature {
        Some(feature) => SessionInit::Ready { feature, summary },
        None if is_task_complete(&goals, &status) => SessionInit::Complete { summary },
        None => SessionInit::Blocked { summary, blocked },
    };
    info!(
        passing = summary.passing,
        total = summary.total,
        next = match &init {
            SessionInit::Ready { feature, .. } => feature.id.as_str(),
            SessionInit::Complete { .. } => "<complete>",
            SessionInit::Blocked { .. } => "<blocked>",
        },
        "session initialized"
    );
    Ok(init)
}

async fn next_feature_context(
    paths: &TaskPaths,
    status: &TaskStatus,
    feature: &Feature,
) -> Result<NextFeatureContext> {
    let feature_id = feature.id.as_str();
    let feature_status = status.feature(feature_id);
    let history = load_review_history(paths, feature_id).await?;
    Ok(NextFeatureContext {
        id: feature.id.clone(),
        description: feature.description.clone(),
        test_command: feature.test_command.clone(),
        attempts: feature_status.map_or(0, |f| f.attempts),
        max_attempts: feature_status.map_or(0, |f| f.max_attempts),
        last_error: feature_status.and_then(|f| f.last_error.clone()),
        binding_decisions: history.binding_decisions,
        history: read_feature_progress(&paths.progress_path, feature_id).await?,
    })
}

/// Close a session with a free-form note and the current progress.
pub async fn end_session(paths: &TaskPaths, note: &str) -> Result<ProgressSummary> {
    let (goals, status) = load_task(paths).await?;
    let summary = progress_summary(&goals, &status);
    let entry = ProgressEntry::new(
        ProgressKind::SessionEnd,
        if note.trim().is_empty() {
            "Session ended."
        } else {
            note
        },
    )
    .detail(
        "Progress",
        format!(
            "{}/{} features passing ({}%)",
            summary.passing, summary.total, summary.percent_complete
        ),
    );
    append_progress_entry(&paths.progress_path, &entry).await?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::parse_progress;
    use crate::core::status::FeatureState;
    use crate::test_support::{TestTask, feature, force_state, goal_tree, milestone};

    fn task() -> TestTask {
        TestTask::new(goal_tree(vec![
            milestone("m-1", &[], vec![feature("ft-1", &[])]),
            milestone("m-2", &["m-1"], vec![feature("ft-2", &["ft-1"])]),
        ]))
    }

    fn write_status(task: &TestTask, status: &TaskStatus) {
        std::fs::write(
            &task.paths.status_path,
            serde_json::to_string_pretty(status).expect("json"),
        )
        .expect("write status");
    }

    #[tokio::test]
    async fn ready_session_writes_context_and_ledger_entry() {
        let task = task();
        let init = initialize_session(&task.paths, &EngineConfig::default())
            .await
            .expect("session");

        let SessionInit::Ready { feature, summary } = init else {
            panic!("expected a ready session");
        };
        assert_eq!(feature.id, "ft-1");
        assert_eq!(feature.max_attempts, 3);
        assert_eq!(summary.total, 2);

        let context = std::fs::read_to_string(&task.paths.context_path).expect("context");
        assert!(context.contains("## Next Feature: ft-1"));
        let entries = parse_progress(&task.ledger());
        assert_eq!(entries.last().and_then(|e| e.kind()), Some(ProgressKind::SessionStart));
        assert!(entries[0].body.contains("- **Next feature:** ft-1"));
    }

    /// A missing status document is rebuilt from the goal tree.
    #[tokio::test]
    async fn missing_status_is_initialized() {
        let task = task();
        std::fs::remove_file(&task.paths.status_path).expect("remove status");

        initialize_session(&task.paths, &EngineConfig::default())
            .await
            .expect("session");

        assert_eq!(task.status().state_of("ft-2"), Some(FeatureState::Pending));
    }

    #[tokio::test]
    async fn all_passing_reports_complete() {
        let task = task();
        let mut status = task.status();
        force_state(&mut status, "ft-1", FeatureState::Passing);
        force_state(&mut status, "ft-2", FeatureState::Passing);
        write_status(&task, &status);

        let init = initialize_session(&task.paths, &EngineConfig::default())
            .await
            .expect("session");
        assert_eq!(init.summary().percent_complete, 100);
        assert!(matches!(init, SessionInit::Complete { .. }));
    }

    #[tokio::test]
    async fn starved_task_reports_blocked_features() {
        let task = task();
        let mut status = task.status();
        force_state(&mut status, "ft-1", FeatureState::Blocked);
        write_status(&task, &status);

        let init = initialize_session(&task.paths, &EngineConfig::default())
            .await
            .expect("session");
        assert_eq!(
            init,
            SessionInit::Blocked {
                summary: init.summary(),
                blocked: vec!["ft-1".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn end_session_appends_note() {
        let task = task();
        let summary = end_session(&task.paths, "Implemented login form.")
            .await
            .expect("end");
        assert_eq!(summary.passing, 0);
        let entries = parse_progress(&task.ledger());
        assert_eq!(entries[0].kind(), Some(ProgressKind::SessionEnd));
        assert!(entries[0].body.contains("Implemented login form."));
    }
}

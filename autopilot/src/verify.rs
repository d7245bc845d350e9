//! Test verification step for `autopilot verify`.
//!
//! Runs a feature's test command and applies the result to status. A pass
//! only moves the feature to `in_progress`; finalizing it is the review
//! gate's job.

use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, instrument};

use crate::core::progress::{ProgressEntry, ProgressKind};
use crate::core::status::{
    FeatureState, TransitionError, recalculate_milestone_status, record_test_result,
};
use crate::core::types::TestResult;
use crate::io::goal_store::require_goals;
use crate::io::notifier::{Notification, Notifier};
use crate::io::paths::TaskPaths;
use crate::io::progress_log::append_progress_entry;
use crate::io::status_store::update_status;
use crate::io::test_runner::TestRunner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub result: TestResult,
    pub state: FeatureState,
    pub attempts: u32,
    pub max_attempts: u32,
}

/// Run the tests for `feature_id` in `workdir` and record the attempt.
#[instrument(skip_all, fields(feature_id = %feature_id))]
pub async fn run_feature_tests(
    paths: &TaskPaths,
    feature_id: &str,
    runner: &dyn TestRunner,
    notifier: &dyn Notifier,
    workdir: &Path,
) -> Result<VerifyOutcome> {
    let goals = require_goals(&paths.goals_path).await?;
    let feature = goals
        .find_feature(feature_id)
        .ok_or_else(|| TransitionError::UnknownFeature(feature_id.to_string()))?;

    let result = runner.run(&feature.test_command, workdir).await;
    let at = Utc::now();

    let status = update_status(&paths.status_path, |status| {
        let next = record_test_result(status, feature_id, &result, at)?;
        Ok(recalculate_milestone_status(&next, &goals))
    })
    .await?;
    let feature_status = status
        .feature(feature_id)
        .ok_or_else(|| TransitionError::UnknownFeature(feature_id.to_string()))?;

    let outcome = VerifyOutcome {
        result,
        state: feature_status.status,
        attempts: feature_status.attempts,
        max_attempts: feature_status.max_attempts,
    };
    narrate(paths, feature_id, &outcome, at).await?;

    if outcome.state == FeatureState::Blocked {
        notifier
            .notify(&Notification::FeatureBlocked {
                feature_id: feature_id.to_string(),
                reason: format!("{} failed attempts", outcome.attempts),
            })
            .await;
    }

    info!(
        state = outcome.state.as_str(),
        attempts = outcome.attempts,
        passed = outcome.result.passed,
        "feature tests recorded"
    );
    Ok(outcome)
}

async fn narrate(
    paths: &TaskPaths,
    feature_id: &str,
    outcome: &VerifyOutcome,
    at: chrono::DateTime<Utc>,
) -> Result<()> {
    let result = &outcome.result;
    let attempt = ProgressEntry::new(
        ProgressKind::FeatureAttempt,
        if result.passed {
            "Tests passed; awaiting review."
        } else {
            "Tests failed."
        },
    )
    .at(at)
    .feature(feature_id)
    .detail(
        "Attempt",
        format!("{}/{}", outcome.attempts, outcome.max_attempts),
    )
    .detail("Duration", format!("{}ms", result.duration_ms));
    append_progress_entry(&paths.progress_path, &attempt).await?;

    let follow_up = match outcome.state {
        FeatureState::Failing => Some(
            ProgressEntry::new(ProgressKind::FeatureFailed, result.failure_summary())
                .detail_opt("Exit code", result.exit_code),
        ),
        FeatureState::Blocked => Some(
            ProgressEntry::new(
                ProgressKind::FeatureBlocked,
                format!(
                    "Blocked after {} failed attempts.",
                    outcome.attempts
                ),
            )
            .detail("Last error", result.failure_summary()),
        ),
        FeatureState::Pending | FeatureState::InProgress | FeatureState::Passing => None,
    };
    if let Some(entry) = follow_up {
        append_progress_entry(&paths.progress_path, &entry.at(at).feature(feature_id)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::parse_progress;
    use crate::test_support::{
        RecordingNotifier, ScriptedTestRunner, TestTask, feature, goal_tree, milestone,
    };

    fn task() -> TestTask {
        TestTask::new(goal_tree(vec![milestone(
            "m-1",
            &[],
            vec![feature("ft-1", &[])],
        )]))
    }

    #[tokio::test]
    async fn passing_tests_move_feature_to_review() {
        let task = task();
        let runner = ScriptedTestRunner::new();
        let notifier = RecordingNotifier::default();

        let outcome = run_feature_tests(&task.paths, "ft-1", &runner, &notifier, &task.workdir())
            .await
            .expect("verify");

        assert_eq!(outcome.state, FeatureState::InProgress);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(runner.calls(), vec!["true # ft-1"]);
        let entries = parse_progress(&task.ledger());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind(), Some(ProgressKind::FeatureAttempt));
        assert_eq!(entries[0].feature_id(), Some("ft-1"));
    }

    /// The third consecutive failure exhausts the default budget and blocks.
    #[tokio::test]
    async fn repeated_failures_block_and_notify() {
        let task = task();
        let failure = TestResult::failed(3, Some(1), "assertion failed");
        let runner = ScriptedTestRunner::new().script(
            "true # ft-1",
            vec![failure.clone(), failure.clone(), failure],
        );
        let notifier = RecordingNotifier::default();

        for expected in [FeatureState::Failing, FeatureState::Failing, FeatureState::Blocked] {
            let outcome =
                run_feature_tests(&task.paths, "ft-1", &runner, &notifier, &task.workdir())
                    .await
                    .expect("verify");
            assert_eq!(outcome.state, expected);
        }

        assert_eq!(task.status().state_of("ft-1"), Some(FeatureState::Blocked));
        let labels: Vec<String> = parse_progress(&task.ledger())
            .into_iter()
            .map(|e| e.label)
            .collect();
        assert_eq!(labels.iter().filter(|l| *l == "Feature Failed").count(), 2);
        assert_eq!(labels.last().map(String::as_str), Some("Feature Blocked"));
        assert_eq!(
            notifier.notifications(),
            vec![Notification::FeatureBlocked {
                feature_id: "ft-1".to_string(),
                reason: "3 failed attempts".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn unknown_feature_is_a_caller_error() {
        let task = task();
        let err = run_feature_tests(
            &task.paths,
            "ft-9",
            &ScriptedTestRunner::new(),
            &RecordingNotifier::default(),
            &task.workdir(),
        )
        .await
        .expect_err("unknown");
        assert_eq!(err.to_string(), "unknown feature 'ft-9'");
    }
}

//! Selection helpers for `autopilot select` and `autopilot status`.

use anyhow::Result;
use serde::Serialize;

use crate::core::goals::GoalTree;
use crate::core::scheduler::{blocked_features, is_task_complete, select_next_feature};
use crate::core::status::{DEFAULT_MAX_ATTEMPTS, FeatureState, TaskStatus, initialize_status};
use crate::io::goal_store::require_goals;
use crate::io::paths::TaskPaths;
use crate::io::status_store::load_status;

/// Structured selection outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectOutcome {
    /// Every feature is passing.
    Complete,
    Open(SelectedFeature),
    /// Nothing selectable; progress needs a human or a goal change.
    Blocked { blocked: Vec<String> },
}

/// Minimal selected feature metadata for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedFeature {
    pub id: String,
    pub milestone_id: String,
    pub state: FeatureState,
    pub attempts: u32,
    pub max_attempts: u32,
}

/// Select the next feature from in-memory documents.
pub fn select_feature(goals: &GoalTree, status: &TaskStatus) -> SelectOutcome {
    let Some(feature) = select_next_feature(goals, status) else {
        if is_task_complete(goals, status) {
            return SelectOutcome::Complete;
        }
        return SelectOutcome::Blocked {
            blocked: blocked_features(goals, status),
        };
    };
    let feature_status = status.feature(&feature.id);
    SelectOutcome::Open(SelectedFeature {
        id: feature.id.clone(),
        milestone_id: goals
            .milestone_of(&feature.id)
            .map(|milestone| milestone.id.clone())
            .unwrap_or_default(),
        state: feature_status.map_or(FeatureState::Pending, |f| f.status),
        attempts: feature_status.map_or(0, |f| f.attempts),
        max_attempts: feature_status.map_or(0, |f| f.max_attempts),
    })
}

/// Load goals and status from a task directory and select the next feature.
pub async fn select_from_task(paths: &TaskPaths) -> Result<SelectOutcome> {
    let (goals, status) = load_task(paths).await?;
    Ok(select_feature(&goals, &status))
}

/// Goals plus status; a missing status reads as a fresh one.
pub async fn load_task(paths: &TaskPaths) -> Result<(GoalTree, TaskStatus)> {
    let goals = require_goals(&paths.goals_path).await?;
    let status = match load_status(&paths.status_path).await? {
        Some(status) => status,
        None => initialize_status(&paths.task_id(), &goals, DEFAULT_MAX_ATTEMPTS),
    };
    Ok((goals, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestTask, feature, force_state, goal_tree, milestone};

    fn goals() -> GoalTree {
        goal_tree(vec![
            milestone("m-1", &[], vec![feature("ft-1", &[])]),
            milestone("m-2", &["m-1"], vec![feature("ft-2", &[])]),
        ])
    }

    #[test]
    fn select_returns_first_open_feature() {
        let goals = goals();
        let status = initialize_status("t", &goals, 3);
        assert_eq!(
            select_feature(&goals, &status),
            SelectOutcome::Open(SelectedFeature {
                id: "ft-1".to_string(),
                milestone_id: "m-1".to_string(),
                state: FeatureState::Pending,
                attempts: 0,
                max_attempts: 3,
            })
        );
    }

    #[test]
    fn select_reports_blocked_when_starved() {
        let goals = goals();
        let mut status = initialize_status("t", &goals, 3);
        force_state(&mut status, "ft-1", FeatureState::Blocked);
        assert_eq!(
            select_feature(&goals, &status),
            SelectOutcome::Blocked {
                blocked: vec!["ft-1".to_string()]
            }
        );
    }

    #[test]
    fn select_reports_complete() {
        let goals = goals();
        let mut status = initialize_status("t", &goals, 3);
        force_state(&mut status, "ft-1", FeatureState::Passing);
        force_state(&mut status, "ft-2", FeatureState::Passing);
        assert_eq!(select_feature(&goals, &status), SelectOutcome::Complete);
    }

    #[tokio::test]
    async fn select_from_task_reads_documents() {
        let task = TestTask::new(goals());
        let outcome = select_from_task(&task.paths).await.expect("select");
        assert!(matches!(outcome, SelectOutcome::Open(ref f) if f.id == "ft-1"));
    }
}

//! Deterministic, dependency-gated feature selection.

use serde::Serialize;

use crate::core::goals::{Feature, GoalTree, MilestoneGoal};
use crate::core::status::{FeatureState, TaskStatus};

/// Pick the next feature to work on.
///
/// Milestones are walked in declaration order and skipped while any of their
/// milestone dependencies is not fully passing. Within a milestone, the first
/// feature that is neither passing nor blocked and whose feature dependencies
/// all pass wins. `None` means complete or dependency-starved; use
/// [`is_task_complete`] to tell them apart.
pub fn select_next_feature<'a>(goals: &'a GoalTree, status: &TaskStatus) -> Option<&'a Feature> {
    for milestone in &goals.milestones {
        if !milestone_dependencies_met(goals, status, milestone) {
            continue;
        }
        for feature in milestone.features() {
            if matches!(
                status.state_of(&feature.id),
                Some(FeatureState::Passing | FeatureState::Blocked)
            ) {
                continue;
            }
            if feature.depends_on.iter().all(|dep| status.is_passing(dep)) {
                return Some(feature);
            }
        }
    }
    None
}

fn milestone_dependencies_met(
    goals: &GoalTree,
    status: &TaskStatus,
    milestone: &MilestoneGoal,
) -> bool {
    milestone.depends_on.iter().all(|dep_id| {
        goals
            .find_milestone(dep_id)
            .is_some_and(|dep| is_milestone_fully_passing(status, dep))
    })
}

/// True when every feature of `milestone` is passing.
pub fn is_milestone_fully_passing(status: &TaskStatus, milestone: &MilestoneGoal) -> bool {
    milestone
        .features()
        .all(|feature| status.is_passing(&feature.id))
}

pub fn has_exceeded_max_attempts(status: &TaskStatus, feature_id: &str) -> bool {
    status
        .feature(feature_id)
        .is_some_and(|feature| feature.attempts >= feature.max_attempts)
}

/// Ids of blocked features, in goal-tree order.
pub fn blocked_features(goals: &GoalTree, status: &TaskStatus) -> Vec<String> {
    goals
        .features()
        .filter(|feature| status.state_of(&feature.id) == Some(FeatureState::Blocked))
        .map(|feature| feature.id.clone())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub passing: u32,
    pub total: u32,
    pub in_progress: u32,
    pub failing: u32,
    pub blocked: u32,
    /// Rounded percentage of passing features (0 for an empty task).
    pub percent_complete: u32,
}

pub fn progress_summary(goals: &GoalTree, status: &TaskStatus) -> ProgressSummary {
    let mut summary = ProgressSummary {
        passing: 0,
        total: 0,
        in_progress: 0,
        failing: 0,
        blocked: 0,
        percent_complete: 0,
    };
    for feature in goals.features() {
        summary.total += 1;
        match status.state_of(&feature.id) {
            Some(FeatureState::Passing) => summary.passing += 1,
            Some(FeatureState::InProgress) => summary.in_progress += 1,
            Some(FeatureState::Failing) => summary.failing += 1,
            Some(FeatureState::Blocked) => summary.blocked += 1,
            Some(FeatureState::Pending) | None => {}
        }
    }
    if summary.total > 0 {
        summary.percent_complete =
            ((f64::from(summary.passing) * 100.0) / f64::from(summary.total)).round() as u32;
    }
    summary
}

/// True when the task has features and all of them are passing.
pub fn is_task_complete(goals: &GoalTree, status: &TaskStatus) -> bool {
    let mut features = goals.features().peekable();
    features.peek().is_some() && features.all(|feature| status.is_passing(&feature.id))
}

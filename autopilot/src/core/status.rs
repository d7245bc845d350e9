//! Verified-status mirror of the goal tree and its pure transitions.
//!
//! Every mutator takes a `TaskStatus` by reference and returns a new value;
//! nothing is updated in place. `passing` is only reachable through
//! [`approve_feature`], and `attempts` only moves in [`record_test_result`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::goals::{GoalTree, MilestoneGoal};
use crate::core::types::TestResult;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureState {
    Pending,
    /// Tests passed; awaiting review.
    InProgress,
    Passing,
    Failing,
    Blocked,
}

impl FeatureState {
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureState::Pending => "pending",
            FeatureState::InProgress => "in_progress",
            FeatureState::Passing => "passing",
            FeatureState::Failing => "failing",
            FeatureState::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureStatus {
    pub status: FeatureState,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_test: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_test_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub commits: Vec<String>,
}

impl FeatureStatus {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            status: FeatureState::Pending,
            attempts: 0,
            max_attempts,
            last_test: None,
            last_test_duration: None,
            last_error: None,
            commits: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneState {
    Pending,
    InProgress,
    Passing,
    Blocked,
}

impl MilestoneState {
    pub fn as_str(self) -> &'static str {
        match self {
            MilestoneState::Pending => "pending",
            MilestoneState::InProgress => "in_progress",
            MilestoneState::Passing => "passing",
            MilestoneState::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneStatus {
    pub status: MilestoneState,
    pub passing: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub task_id: String,
    pub last_updated: DateTime<Utc>,
    pub features: BTreeMap<String, FeatureStatus>,
    pub milestones: BTreeMap<String, MilestoneStatus>,
}

impl TaskStatus {
    pub fn feature(&self, feature_id: &str) -> Option<&FeatureStatus> {
        self.features.get(feature_id)
    }

    pub fn state_of(&self, feature_id: &str) -> Option<FeatureState> {
        self.features.get(feature_id).map(|status| status.status)
    }

    pub fn is_passing(&self, feature_id: &str) -> bool {
        self.state_of(feature_id) == Some(FeatureState::Passing)
    }
}

/// Caller-contract violations raised by status transitions.
///
/// These indicate the caller's view of state is stale or wrong; retrying the
/// same call cannot succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("unknown feature '{0}'")]
    UnknownFeature(String),
    #[error("feature '{feature_id}' cannot be approved from status {}", .current.as_str())]
    NotAwaitingReview {
        feature_id: String,
        current: FeatureState,
    },
}

/// Build a fresh status: every feature pending, milestone totals precomputed.
pub fn initialize_status(task_id: &str, goals: &GoalTree, max_attempts: u32) -> TaskStatus {
    let mut features = BTreeMap::new();
    for feature in goals.features() {
        features.insert(feature.id.clone(), FeatureStatus::new(max_attempts));
    }

    let milestones = goals
        .milestones
        .iter()
        .map(|milestone| {
            (
                milestone.id.clone(),
                MilestoneStatus {
                    status: MilestoneState::Pending,
                    passing: 0,
                    total: milestone.feature_count(),
                },
            )
        })
        .collect();

    TaskStatus {
        task_id: task_id.to_string(),
        last_updated: Utc::now(),
        features,
        milestones,
    }
}

/// Derive every milestone status from the current feature statuses.
///
/// Idempotent: `lastUpdated` is left untouched so applying this twice yields
/// an identical value.
pub fn recalculate_milestone_status(status: &TaskStatus, goals: &GoalTree) -> TaskStatus {
    let mut next = status.clone();
    next.milestones = goals
        .milestones
        .iter()
        .map(|milestone| (milestone.id.clone(), aggregate_milestone(status, milestone)))
        .collect();
    next
}

fn aggregate_milestone(status: &TaskStatus, milestone: &MilestoneGoal) -> MilestoneStatus {
    let states: Vec<FeatureState> = milestone
        .features()
        .map(|feature| {
            status
                .state_of(&feature.id)
                .unwrap_or(FeatureState::Pending)
        })
        .collect();
    let total = states.len() as u32;
    let passing = states
        .iter()
        .filter(|state| **state == FeatureState::Passing)
        .count() as u32;

    let aggregated = if passing == total {
        MilestoneState::Passing
    } else if states.contains(&FeatureState::Blocked) {
        MilestoneState::Blocked
    } else if states.iter().any(|state| *state != FeatureState::Pending) {
        MilestoneState::InProgress
    } else {
        MilestoneState::Pending
    };

    MilestoneStatus {
        status: aggregated,
        passing,
        total,
    }
}

/// Apply a test execution to a feature: `attempts + 1`, then
/// pass → `in_progress` (awaiting review), fail → `failing`, or `blocked`
/// once the attempt budget is exhausted.
pub fn record_test_result(
    status: &TaskStatus,
    feature_id: &str,
    result: &TestResult,
    at: DateTime<Utc>,
) -> Result<TaskStatus, TransitionError> {
    update_feature(status, feature_id, at, |feature| {
        feature.attempts += 1;
        feature.last_test = Some(at);
        feature.last_test_duration = Some(result.duration_ms);
        if result.passed {
            feature.status = FeatureState::InProgress;
            feature.last_error = None;
        } else {
            feature.last_error = Some(result.failure_summary());
            feature.status = if feature.attempts >= feature.max_attempts {
                FeatureState::Blocked
            } else {
                FeatureState::Failing
            };
        }
        Ok(())
    })
}

/// Finalize a reviewed feature. Only legal from `in_progress`.
pub fn approve_feature(
    status: &TaskStatus,
    feature_id: &str,
    at: DateTime<Utc>,
) -> Result<TaskStatus, TransitionError> {
    update_feature(status, feature_id, at, |feature| {
        if feature.status != FeatureState::InProgress {
            return Err(TransitionError::NotAwaitingReview {
                feature_id: feature_id.to_string(),
                current: feature.status,
            });
        }
        feature.status = FeatureState::Passing;
        feature.last_error = None;
        Ok(())
    })
}

/// Send a feature back for rework, recording reviewer feedback as the error.
pub fn reject_feature(
    status: &TaskStatus,
    feature_id: &str,
    feedback: &str,
    at: DateTime<Utc>,
) -> Result<TaskStatus, TransitionError> {
    update_feature(status, feature_id, at, |feature| {
        feature.status = FeatureState::Failing;
        feature.last_error = Some(feedback.to_string());
        Ok(())
    })
}

/// Mark a feature as blocked (e.g. by a human or an exhausted external budget).
pub fn block_feature(
    status: &TaskStatus,
    feature_id: &str,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<TaskStatus, TransitionError> {
    update_feature(status, feature_id, at, |feature| {
        feature.status = FeatureState::Blocked;
        feature.last_error = Some(reason.to_string());
        Ok(())
    })
}

pub fn add_commit(
    status: &TaskStatus,
    feature_id: &str,
    commit: &str,
    at: DateTime<Utc>,
) -> Result<TaskStatus, TransitionError> {
    update_feature(status, feature_id, at, |feature| {
        feature.commits.push(commit.to_string());
        Ok(())
    })
}

fn update_feature<F>(
    status: &TaskStatus,
    feature_id: &str,
    at: DateTime<Utc>,
    apply: F,
) -> Result<TaskStatus, TransitionError>
where
    F: FnOnce(&mut FeatureStatus) -> Result<(), TransitionError>,
{
    let mut next = status.clone();
    let feature = next
        .features
        .get_mut(feature_id)
        .ok_or_else(|| TransitionError::UnknownFeature(feature_id.to_string()))?;
    apply(feature)?;
    next.last_updated = at;
    Ok(next)
}

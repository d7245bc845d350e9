//! Parallel-exploration checkpoint model and crash-recovery decisions.
//!
//! A checkpoint tracks competing implementation approaches for one feature.
//! [`resume_action`] maps any persisted checkpoint to exactly one next step,
//! so restarting after a crash is deterministic.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationPhase {
    Initializing,
    Implementing,
    Testing,
    Comparing,
    Finalizing,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproachStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Timeout,
}

impl ApproachStatus {
    /// Completed or failed; `timeout` is resumable.
    pub fn is_settled(self) -> bool {
        matches!(self, ApproachStatus::Completed | ApproachStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproachTestResult {
    pub passed: bool,
    pub duration_ms: u64,
    #[serde(default)]
    pub summary: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproachCheckpoint {
    pub id: String,
    /// Short description of the strategy this approach follows.
    pub strategy: String,
    pub status: ApproachStatus,
    pub cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_result: Option<ApproachTestResult>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ApproachCheckpoint {
    pub fn new(id: impl Into<String>, strategy: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            strategy: strategy.into(),
            status: ApproachStatus::Pending,
            cost_usd: 0.0,
            test_result: None,
            files_modified: Vec::new(),
            error: None,
            updated_at: at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationCheckpoint {
    pub task_id: String,
    pub feature_id: String,
    pub phase: ExplorationPhase,
    pub approaches: Vec<ApproachCheckpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_approach: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_reason: Option<String>,
    pub total_cost_usd: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExplorationCheckpoint {
    pub fn new(
        task_id: &str,
        feature_id: &str,
        approaches: Vec<ApproachCheckpoint>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            feature_id: feature_id.to_string(),
            phase: ExplorationPhase::Initializing,
            approaches,
            selected_approach: None,
            selection_reason: None,
            total_cost_usd: 0.0,
            created_at: at,
            updated_at: at,
        }
    }

    /// Like [`ExplorationCheckpoint::new`], but approach ids must be unique.
    pub fn start(
        task_id: &str,
        feature_id: &str,
        approaches: Vec<ApproachCheckpoint>,
        at: DateTime<Utc>,
    ) -> Result<Self, CheckpointError> {
        let mut seen = HashSet::new();
        if let Some(duplicate) = approaches.iter().find(|a| !seen.insert(a.id.as_str())) {
            return Err(CheckpointError::DuplicateApproach {
                feature_id: feature_id.to_string(),
                approach_id: duplicate.id.clone(),
            });
        }
        Ok(Self::new(task_id, feature_id, approaches, at))
    }

    pub fn approach(&self, approach_id: &str) -> Option<&ApproachCheckpoint> {
        self.approaches.iter().find(|a| a.id == approach_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointError {
    #[error("no exploration checkpoint for feature '{0}'")]
    Missing(String),
    #[error("feature '{feature_id}' has no approach '{approach_id}'")]
    UnknownApproach {
        feature_id: String,
        approach_id: String,
    },
    #[error("feature '{feature_id}' lists approach '{approach_id}' more than once")]
    DuplicateApproach {
        feature_id: String,
        approach_id: String,
    },
}

/// The single next step after (re)loading a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResumeAction {
    /// No checkpoint exists; exploration has not started.
    StartFresh,
    ContinueImplementation { approach_ids: Vec<String> },
    RunTests { approach_ids: Vec<String> },
    Compare,
    Finalize,
    AlreadyComplete,
    /// Every approach failed; nothing left to compare.
    AllFailed,
}

/// Decide how to resume from `checkpoint`.
///
/// Terminal phases map directly. Otherwise unsettled approaches (anything but
/// completed/failed) are resumed first, then completed approaches without a
/// test result are tested, then the tested set is compared.
///
/// The phase wins over approach states: a `complete` checkpoint whose
/// approach is still `in_progress` resumes as [`ResumeAction::AlreadyComplete`].
pub fn resume_action(checkpoint: &ExplorationCheckpoint) -> ResumeAction {
    match checkpoint.phase {
        ExplorationPhase::Complete => return ResumeAction::AlreadyComplete,
        ExplorationPhase::Finalizing => return ResumeAction::Finalize,
        ExplorationPhase::Comparing => return ResumeAction::Compare,
        ExplorationPhase::Initializing
        | ExplorationPhase::Implementing
        | ExplorationPhase::Testing => {}
    }

    let unsettled = ids_where(checkpoint, |a| !a.status.is_settled());
    if !unsettled.is_empty() {
        return ResumeAction::ContinueImplementation {
            approach_ids: unsettled,
        };
    }

    let untested = ids_where(checkpoint, |a| {
        a.status == ApproachStatus::Completed && a.test_result.is_none()
    });
    if !untested.is_empty() {
        return ResumeAction::RunTests {
            approach_ids: untested,
        };
    }

    if checkpoint
        .approaches
        .iter()
        .any(|a| a.status == ApproachStatus::Completed)
    {
        ResumeAction::Compare
    } else {
        ResumeAction::AllFailed
    }
}

fn ids_where<F>(checkpoint: &ExplorationCheckpoint, predicate: F) -> Vec<String>
where
    F: Fn(&ApproachCheckpoint) -> bool,
{
    checkpoint
        .approaches
        .iter()
        .filter(|a| predicate(a))
        .map(|a| a.id.clone())
        .collect()
}

pub fn set_phase(
    checkpoint: &ExplorationCheckpoint,
    phase: ExplorationPhase,
    at: DateTime<Utc>,
) -> ExplorationCheckpoint {
    let mut next = checkpoint.clone();
    next.phase = phase;
    next.updated_at = at;
    next
}

/// Update an approach's status, optionally recording an error and touched files.
pub fn set_approach_status(
    checkpoint: &ExplorationCheckpoint,
    approach_id: &str,
    status: ApproachStatus,
    error: Option<String>,
    files_modified: Option<Vec<String>>,
    at: DateTime<Utc>,
) -> Result<ExplorationCheckpoint, CheckpointError> {
    update_approach(checkpoint, approach_id, at, |approach| {
        approach.status = status;
        if error.is_some() {
            approach.error = error;
        }
        if let Some(files) = files_modified {
            approach.files_modified = files;
        }
    })
}

pub fn set_test_result(
    checkpoint: &ExplorationCheckpoint,
    approach_id: &str,
    result: ApproachTestResult,
    at: DateTime<Utc>,
) -> Result<ExplorationCheckpoint, CheckpointError> {
    update_approach(checkpoint, approach_id, at, |approach| {
        approach.test_result = Some(result);
    })
}

pub fn set_selection(
    checkpoint: &ExplorationCheckpoint,
    approach_id: &str,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<ExplorationCheckpoint, CheckpointError> {
    let mut next = update_approach(checkpoint, approach_id, at, |_| {})?;
    next.selected_approach = Some(approach_id.to_string());
    next.selection_reason = Some(reason.to_string());
    Ok(next)
}

/// Add spend to one approach and to the checkpoint total.
pub fn add_approach_cost(
    checkpoint: &ExplorationCheckpoint,
    approach_id: &str,
    cost_usd: f64,
    at: DateTime<Utc>,
) -> Result<ExplorationCheckpoint, CheckpointError> {
    let mut next = update_approach(checkpoint, approach_id, at, |approach| {
        approach.cost_usd += cost_usd;
    })?;
    next.total_cost_usd += cost_usd;
    Ok(next)
}

fn update_approach<F>(
    checkpoint: &ExplorationCheckpoint,
    approach_id: &str,
    at: DateTime<Utc>,
    apply: F,
) -> Result<ExplorationCheckpoint, CheckpointError>
where
    F: FnOnce(&mut ApproachCheckpoint),
{
    let mut next = checkpoint.clone();
    let approach = next
        .approaches
        .iter_mut()
        .find(|a| a.id == approach_id)
        .ok_or_else(|| CheckpointError::UnknownApproach {
            feature_id: checkpoint.feature_id.clone(),
            approach_id: approach_id.to_string(),
        })?;
    apply(approach);
    approach.updated_at = at;
    next.updated_at = at;
    Ok(next)
}

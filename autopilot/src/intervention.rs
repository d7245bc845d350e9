//! Changes made on a human's behalf: manual blocks, commits and exploration starts.

use anyhow::{Result, anyhow};
use chrono::Utc;
use tracing::info;

use crate::core::exploration::{ApproachCheckpoint, ExplorationCheckpoint};
use crate::core::goals::GoalTree;
use crate::core::progress::{ProgressEntry, ProgressKind};
use crate::core::status::{
    TaskStatus, TransitionError, add_commit, block_feature, recalculate_milestone_status,
};
use crate::io::checkpoint_store::CheckpointStore;
use crate::io::goal_store::require_goals;
use crate::io::notifier::{Notification, Notifier};
use crate::io::paths::TaskPaths;
use crate::io::progress_log::append_progress_entry;
use crate::io::status_store::update_status;

/// Block `feature_id` on behalf of a human, recording `reason` as its error.
pub async fn block_manually(
    paths: &TaskPaths,
    feature_id: &str,
    reason: &str,
    notifier: &dyn Notifier,
) -> Result<TaskStatus> {
    let goals = load_goals_for(paths, feature_id).await?;
    let at = Utc::now();
    let status = update_status(&paths.status_path, |status| {
        let next = block_feature(status, feature_id, reason, at)?;
        Ok(recalculate_milestone_status(&next, &goals))
    })
    .await?;

    for entry in [
        ProgressEntry::new(ProgressKind::HumanIntervention, "Feature blocked by a human.")
            .detail("Reason", reason),
        ProgressEntry::new(ProgressKind::FeatureBlocked, reason),
    ] {
        append_progress_entry(&paths.progress_path, &entry.at(at).feature(feature_id)).await?;
    }
    notifier
        .notify(&Notification::FeatureBlocked {
            feature_id: feature_id.to_string(),
            reason: reason.to_string(),
        })
        .await;

    info!(feature_id, "feature blocked manually");
    Ok(status)
}

/// Attach a commit id to a feature's append-only commit list.
pub async fn record_commit(
    paths: &TaskPaths,
    feature_id: &str,
    commit: &str,
) -> Result<TaskStatus> {
    load_goals_for(paths, feature_id).await?;
    update_status(&paths.status_path, |status| {
        Ok(add_commit(status, feature_id, commit, Utc::now())?)
    })
    .await
}

/// Create the exploration checkpoint for a known feature.
///
/// Each approach is `id=strategy` (a bare `id` has an empty strategy). An
/// existing checkpoint must be cleared first.
pub async fn start_exploration(
    paths: &TaskPaths,
    feature_id: &str,
    approaches: &[String],
) -> Result<ExplorationCheckpoint> {
    load_goals_for(paths, feature_id).await?;
    let store = CheckpointStore::new(&paths.parallel_dir);
    if store.exists(feature_id).await? {
        return Err(anyhow!(
            "exploration for '{feature_id}' already has a checkpoint; clear it first"
        ));
    }
    let at = Utc::now();
    let approaches = approaches
        .iter()
        .map(|arg| {
            let (id, strategy) = arg.split_once('=').unwrap_or((arg.as_str(), ""));
            ApproachCheckpoint::new(id, strategy, at)
        })
        .collect();
    let checkpoint = ExplorationCheckpoint::start(&paths.task_id(), feature_id, approaches, at)?;
    store.save(&checkpoint).await?;
    info!(
        feature_id,
        approaches = checkpoint.approaches.len(),
        "exploration started"
    );
    Ok(checkpoint)
}

async fn load_goals_for(paths: &TaskPaths, feature_id: &str) -> Result<GoalTree> {
    let goals = require_goals(&paths.goals_path).await?;
    if goals.find_feature(feature_id).is_none() {
        return Err(TransitionError::UnknownFeature(feature_id.to_string()).into());
    }
    Ok(goals)
}

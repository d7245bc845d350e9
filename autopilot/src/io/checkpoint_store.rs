//! Durable parallel-exploration checkpoints (`parallel/<feature>.json`).
//!
//! Every mutator is load → mutate → save with no locking; concurrent updates
//! to the same feature are last-writer-wins.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::fs;
use tracing::{debug, info};

use crate::core::exploration::{
    ApproachStatus, ApproachTestResult, CheckpointError, ExplorationCheckpoint, ExplorationPhase,
    ResumeAction, add_approach_cost, resume_action, set_approach_status, set_phase,
    set_selection, set_test_result,
};
use crate::io::documents::{load_json, remove_file, save_json};

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, feature_id: &str) -> PathBuf {
        self.dir.join(format!("{feature_id}.json"))
    }

    pub async fn save(&self, checkpoint: &ExplorationCheckpoint) -> Result<()> {
        debug!(
            feature_id = %checkpoint.feature_id,
            phase = ?checkpoint.phase,
            "saving exploration checkpoint"
        );
        save_json(&self.path_for(&checkpoint.feature_id), checkpoint).await
    }

    pub async fn load(&self, feature_id: &str) -> Result<Option<ExplorationCheckpoint>> {
        load_json(&self.path_for(feature_id)).await
    }

    /// Delete a concluded checkpoint. Returns `true` if one existed.
    pub async fn clear(&self, feature_id: &str) -> Result<bool> {
        let removed = remove_file(&self.path_for(feature_id)).await?;
        if removed {
            info!(feature_id, "exploration checkpoint cleared");
        }
        Ok(removed)
    }

    pub async fn exists(&self, feature_id: &str) -> Result<bool> {
        fs::try_exists(self.path_for(feature_id))
            .await
            .with_context(|| format!("stat checkpoint for {feature_id}"))
    }

    /// Feature ids with a checkpoint on disk, sorted. Missing dir → empty.
    pub async fn list_checkpoints(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read dir {}", self.dir.display()));
            }
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("read dir {}", self.dir.display()))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem()
            {
                ids.push(stem.to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub async fn update_phase(
        &self,
        feature_id: &str,
        phase: ExplorationPhase,
    ) -> Result<ExplorationCheckpoint> {
        self.update(feature_id, |cp| Ok(set_phase(cp, phase, Utc::now())))
            .await
    }

    pub async fn update_approach_status(
        &self,
        feature_id: &str,
        approach_id: &str,
        status: ApproachStatus,
        error: Option<String>,
        files_modified: Option<Vec<String>>,
    ) -> Result<ExplorationCheckpoint> {
        self.update(feature_id, |cp| {
            set_approach_status(cp, approach_id, status, error, files_modified, Utc::now())
        })
        .await
    }

    pub async fn record_test_result(
        &self,
        feature_id: &str,
        approach_id: &str,
        result: ApproachTestResult,
    ) -> Result<ExplorationCheckpoint> {
        self.update(feature_id, |cp| {
            set_test_result(cp, approach_id, result, Utc::now())
        })
        .await
    }

    pub async fn record_selection(
        &self,
        feature_id: &str,
        approach_id: &str,
        reason: &str,
    ) -> Result<ExplorationCheckpoint> {
        self.update(feature_id, |cp| {
            set_selection(cp, approach_id, reason, Utc::now())
        })
        .await
    }

    pub async fn add_cost(
        &self,
        feature_id: &str,
        approach_id: &str,
        cost_usd: f64,
    ) -> Result<ExplorationCheckpoint> {
        self.update(feature_id, |cp| {
            add_approach_cost(cp, approach_id, cost_usd, Utc::now())
        })
        .await
    }

    /// Next step for `feature_id`; no checkpoint means start fresh.
    pub async fn resume_action(&self, feature_id: &str) -> Result<ResumeAction> {
        Ok(match self.load(feature_id).await? {
            Some(checkpoint) => resume_action(&checkpoint),
            None => ResumeAction::StartFresh,
        })
    }

    async fn update<F>(&self, feature_id: &str, mutate: F) -> Result<ExplorationCheckpoint>
    where
        F: FnOnce(&ExplorationCheckpoint) -> Result<ExplorationCheckpoint, CheckpointError>,
    {
        let current = self
            .load(feature_id)
            .await?
            .ok_or_else(|| CheckpointError::Missing(feature_id.to_string()))?;
        let next = mutate(&current)?;
        self.save(&next).await?;
        Ok(next)
    }
}

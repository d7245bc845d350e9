//! Validation for `autopilot validate`: task layout, config, goals and status.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;

use crate::io::config::load_config;
use crate::io::goal_store::require_goals;
use crate::io::paths::TaskPaths;
use crate::io::status_store::load_status;

/// Validation outcome for a healthy task directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidateOutcome {
    pub milestones: usize,
    pub features: usize,
    /// False when no `status.json` exists yet.
    pub status_present: bool,
}

/// Validate the task directory: required files, config, goal tree (schema and
/// invariants), and that status tracks exactly the goal tree's features.
pub async fn validate_task(task_dir: &Path) -> Result<ValidateOutcome> {
    let paths = TaskPaths::new(task_dir);

    ensure_dir(&paths.task_dir)?;
    ensure_file(&paths.goals_path)?;

    load_config(&paths.config_path)
        .await
        .with_context(|| "load config.toml")?;
    let goals = require_goals(&paths.goals_path)
        .await
        .with_context(|| "load goals.json")?;

    let status = load_status(&paths.status_path)
        .await
        .with_context(|| "load status.json")?;
    if let Some(status) = &status {
        let expected: BTreeSet<&str> = goals.features().map(|f| f.id.as_str()).collect();
        let tracked: BTreeSet<&str> = status.features.keys().map(String::as_str).collect();
        let missing: Vec<&str> = expected.difference(&tracked).copied().collect();
        let unknown: Vec<&str> = tracked.difference(&expected).copied().collect();
        if !missing.is_empty() || !unknown.is_empty() {
            return Err(anyhow!(
                "status.json out of sync with goals.json: missing [{}], unknown [{}]",
                missing.join(", "),
                unknown.join(", ")
            ));
        }
        if let Some((id, _)) = status
            .features
            .iter()
            .find(|(_, feature)| feature.max_attempts == 0)
        {
            return Err(anyhow!("feature '{id}' has maxAttempts 0"));
        }
    }

    Ok(ValidateOutcome {
        milestones: goals.milestones.len(),
        features: goals.features().count(),
        status_present: status.is_some(),
    })
}

fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing directory {}", path.display()));
    }
    if !path.is_dir() {
        return Err(anyhow!("expected directory {}", path.display()));
    }
    Ok(())
}

fn ensure_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing file {}", path.display()));
    }
    if !path.is_file() {
        return Err(anyhow!("expected file {}", path.display()));
    }
    Ok(())
}

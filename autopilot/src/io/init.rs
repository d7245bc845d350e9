//! Task directory initialization.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tokio::fs;
use tracing::info;

use crate::core::progress::{ProgressEntry, ProgressKind};
use crate::core::status::initialize_status;
use crate::io::config::{EngineConfig, load_config, write_config};
use crate::io::documents::create_if_absent;
use crate::io::goal_store::{parse_goals, write_goals};
use crate::io::paths::TaskPaths;
use crate::io::progress_log::{append_progress_entry, init_ledger};
use crate::io::status_store::save_status;

/// Options for `init_task`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, replace an existing goal tree and reset status.
    pub force: bool,
}

/// Create a task directory from a goal tree document.
///
/// Fails if the task already has a goal tree unless `options.force` is set.
/// The ledger and an existing `config.toml` are never overwritten.
pub async fn init_task(
    task_dir: &Path,
    goals_source: &Path,
    options: &InitOptions,
) -> Result<TaskPaths> {
    let paths = TaskPaths::new(task_dir);
    if fs::try_exists(&paths.goals_path).await.unwrap_or(false) && !options.force {
        return Err(anyhow!(
            "init: {} already exists (use --force to overwrite)",
            paths.goals_path.display()
        ));
    }

    let contents = fs::read_to_string(goals_source)
        .await
        .with_context(|| format!("read {}", goals_source.display()))?;
    let goals = parse_goals(&contents)
        .with_context(|| format!("validate {}", goals_source.display()))?;

    let cfg = if fs::try_exists(&paths.config_path).await.unwrap_or(false) {
        load_config(&paths.config_path).await?
    } else {
        let cfg = EngineConfig::default();
        write_config(&paths.config_path, &cfg).await?;
        cfg
    };

    write_goals(&paths.goals_path, &goals).await?;
    let status = initialize_status(&paths.task_id(), &goals, cfg.max_attempts_default);
    save_status(&paths.status_path, &status).await?;
    create_if_absent(&paths.learnings_path, LEARNINGS_PLACEHOLDER).await?;

    init_ledger(&paths.progress_path, &goals.task_name).await?;
    let entry = ProgressEntry::new(
        ProgressKind::HumanIntervention,
        if options.force {
            "Goal tree replaced; status reset."
        } else {
            "Task initialized."
        },
    )
    .at(Utc::now())
    .detail("Features", goals.features().count())
    .detail("Milestones", goals.milestones.len());
    append_progress_entry(&paths.progress_path, &entry).await?;

    info!(
        task_dir = %task_dir.display(),
        features = goals.features().count(),
        "task initialized"
    );
    Ok(paths)
}

const LEARNINGS_PLACEHOLDER: &str = "# Learnings\n\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::status::FeatureState;
    use crate::io::goal_store::require_goals;
    use crate::io::status_store::load_status;
    use crate::test_support::{feature, goal_tree, milestone};

    fn write_source(dir: &Path) -> std::path::PathBuf {
        let goals = goal_tree(vec![milestone(
            "m-1",
            &[],
            vec![feature("ft-1", &[]), feature("ft-2", &["ft-1"])],
        )]);
        let source = dir.join("source-goals.json");
        std::fs::write(&source, serde_json::to_string_pretty(&goals).expect("json"))
            .expect("write source");
        source
    }

    /// Verifies init creates goals, status, config, learnings and ledger.
    #[tokio::test]
    async fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = write_source(temp.path());
        let task_dir = temp.path().join("login");

        let paths = init_task(&task_dir, &source, &InitOptions { force: false })
            .await
            .expect("init");

        assert!(paths.config_path.is_file());
        assert!(paths.learnings_path.is_file());
        assert_eq!(require_goals(&paths.goals_path).await.expect("goals").features().count(), 2);
        let status = load_status(&paths.status_path).await.expect("status").expect("present");
        assert_eq!(status.task_id, "login");
        assert_eq!(status.state_of("ft-2"), Some(FeatureState::Pending));
        let ledger = std::fs::read_to_string(&paths.progress_path).expect("ledger");
        assert!(ledger.starts_with("# Progress Log: "));
        assert!(ledger.contains("Task initialized."));
    }

    #[tokio::test]
    async fn init_without_force_refuses_existing_task() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = write_source(temp.path());
        let task_dir = temp.path().join("login");

        init_task(&task_dir, &source, &InitOptions { force: false })
            .await
            .expect("init");
        let err = init_task(&task_dir, &source, &InitOptions { force: false })
            .await
            .expect_err("second init");
        assert!(err.to_string().contains("already exists"));
    }

    /// Forced re-init keeps the ledger history and appends to it.
    #[tokio::test]
    async fn init_with_force_keeps_ledger() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = write_source(temp.path());
        let task_dir = temp.path().join("login");
        init_task(&task_dir, &source, &InitOptions { force: false })
            .await
            .expect("init");
        let paths = init_task(&task_dir, &source, &InitOptions { force: true })
            .await
            .expect("re-init");

        let ledger = std::fs::read_to_string(&paths.progress_path).expect("ledger");
        assert!(ledger.contains("Task initialized."));
        assert!(ledger.contains("Goal tree replaced; status reset."));
        assert_eq!(ledger.matches("# Progress Log").count(), 1);
    }
}

//! Canonical document locations inside a task directory.

use std::path::{Path, PathBuf};

/// All canonical paths for one task directory.
#[derive(Debug, Clone)]
pub struct TaskPaths {
    pub task_dir: PathBuf,
    pub goals_path: PathBuf,
    pub status_path: PathBuf,
    pub progress_path: PathBuf,
    pub context_path: PathBuf,
    pub config_path: PathBuf,
    pub learnings_path: PathBuf,
    pub reviews_dir: PathBuf,
    pub decisions_path: PathBuf,
    pub parallel_dir: PathBuf,
}

impl TaskPaths {
    pub fn new(task_dir: impl Into<PathBuf>) -> Self {
        let task_dir = task_dir.into();
        let reviews_dir = task_dir.join("reviews");
        Self {
            goals_path: task_dir.join("goals.json"),
            status_path: task_dir.join("status.json"),
            progress_path: task_dir.join("progress.md"),
            context_path: task_dir.join("context.md"),
            config_path: task_dir.join("config.toml"),
            learnings_path: task_dir.join("learnings.md"),
            decisions_path: reviews_dir.join("decisions.json"),
            reviews_dir,
            parallel_dir: task_dir.join("parallel"),
            task_dir,
        }
    }

    /// Review history side-car for one feature. Histories live one level
    /// below `decisions.json` so no feature id can name that document.
    pub fn review_history_path(&self, feature_id: &str) -> PathBuf {
        self.reviews_dir
            .join("features")
            .join(format!("{feature_id}.json"))
    }

    /// Task id derived from the directory name.
    pub fn task_id(&self) -> String {
        task_id_of(&self.task_dir)
    }
}

fn task_id_of(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "task".to_string())
}

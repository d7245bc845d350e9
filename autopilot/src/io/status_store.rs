//! Status document storage (`status.json`).
//!
//! All writes go through [`update_status`] so there is a single
//! load → mutate → save seam per document.

use std::path::Path;

use anyhow::{Result, anyhow};
use tracing::debug;

use crate::core::status::TaskStatus;
use crate::io::documents::{load_json, save_json};

pub async fn load_status(path: &Path) -> Result<Option<TaskStatus>> {
    load_json(path).await
}

pub async fn save_status(path: &Path, status: &TaskStatus) -> Result<()> {
    debug!(
        path = %path.display(),
        features = status.features.len(),
        "saving status"
    );
    save_json(path, status).await
}

/// Load the status, apply `mutate`, and save the result.
///
/// Fails if no status exists yet; nothing is written when `mutate` fails.
pub async fn update_status<F>(path: &Path, mutate: F) -> Result<TaskStatus>
where
    F: FnOnce(&TaskStatus) -> Result<TaskStatus>,
{
    let current = load_status(path)
        .await?
        .ok_or_else(|| anyhow!("missing status document {}", path.display()))?;
    let next = mutate(&current)?;
    save_status(path, &next).await?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::status::{FeatureState, initialize_status, reject_feature};
    use crate::test_support::{feature, goal_tree, milestone};
    use chrono::Utc;

    #[tokio::test]
    async fn update_applies_mutation_and_persists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("status.json");
        let goals = goal_tree(vec![milestone("m-1", &[], vec![feature("ft-1", &[])])]);
        save_status(&path, &initialize_status("t", &goals, 3))
            .await
            .expect("save");

        update_status(&path, |status| {
            Ok(reject_feature(status, "ft-1", "needs tests", Utc::now())?)
        })
        .await
        .expect("update");

        let loaded = load_status(&path).await.expect("load").expect("present");
        assert_eq!(loaded.state_of("ft-1"), Some(FeatureState::Failing));
    }

    /// A failed mutation leaves the document untouched.
    #[tokio::test]
    async fn failed_mutation_writes_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("status.json");
        let goals = goal_tree(vec![milestone("m-1", &[], vec![feature("ft-1", &[])])]);
        let initial = initialize_status("t", &goals, 3);
        save_status(&path, &initial).await.expect("save");

        let result = update_status(&path, |status| {
            Ok(reject_feature(status, "missing", "x", Utc::now())?)
        })
        .await;
        assert!(result.is_err());
        let loaded = load_status(&path).await.expect("load").expect("present");
        assert_eq!(loaded, initial);
    }

    #[tokio::test]
    async fn update_without_status_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = update_status(&temp.path().join("status.json"), |s| Ok(s.clone())).await;
        assert!(result.is_err());
    }
}

//! Review side-cars: per-feature history and task-level decisions.

use anyhow::Result;
use tracing::debug;

use crate::core::review::{
    FeatureReviewHistory, ReviewRecord, TaskDesignDecisions, add_review_record,
    merge_task_decisions,
};
use crate::io::documents::{load_json, save_json};
use crate::io::paths::TaskPaths;

/// History for one feature; absent side-car → empty history.
pub async fn load_review_history(
    paths: &TaskPaths,
    feature_id: &str,
) -> Result<FeatureReviewHistory> {
    Ok(load_json(&paths.review_history_path(feature_id))
        .await?
        .unwrap_or_else(|| FeatureReviewHistory::empty(feature_id)))
}

pub async fn save_review_history(
    paths: &TaskPaths,
    history: &FeatureReviewHistory,
) -> Result<()> {
    save_json(&paths.review_history_path(&history.feature_id), history).await
}

/// Task-level decision index; absent → empty.
pub async fn load_task_decisions(
    paths: &TaskPaths,
    task_id: &str,
) -> Result<TaskDesignDecisions> {
    Ok(load_json(&paths.decisions_path)
        .await?
        .unwrap_or_else(|| TaskDesignDecisions::empty(task_id)))
}

pub async fn save_task_decisions(
    paths: &TaskPaths,
    decisions: &TaskDesignDecisions,
) -> Result<()> {
    save_json(&paths.decisions_path, decisions).await
}

/// Persist a review: append it to the feature history and merge its
/// decisions into the task-level index.
pub async fn record_review(
    paths: &TaskPaths,
    task_id: &str,
    record: ReviewRecord,
) -> Result<FeatureReviewHistory> {
    let feature_id = record.feature_id.clone();
    let new_decisions = record.decisions.clone();

    let history = load_review_history(paths, &feature_id).await?;
    let history = add_review_record(&history, record);
    save_review_history(paths, &history).await?;

    if !new_decisions.is_empty() {
        let decisions = load_task_decisions(paths, task_id).await?;
        let decisions = merge_task_decisions(&decisions, &new_decisions);
        save_task_decisions(paths, &decisions).await?;
    }

    debug!(
        feature_id = %feature_id,
        reviews = history.reviews.len(),
        binding = history.binding_decisions.len(),
        "review recorded"
    );
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::review::ReviewDecision;
    use crate::test_support::design_decision;
    use chrono::Utc;

    fn record(id: &str, decision_ids: &[&str]) -> ReviewRecord {
        ReviewRecord {
            id: id.to_string(),
            feature_id: "ft-1".to_string(),
            timestamp: Utc::now(),
            decision: ReviewDecision::ChangesRequested,
            confidence: 0.7,
            feedback: "tighten it".to_string(),
            issues: Vec::new(),
            suggestions: Vec::new(),
            decisions: decision_ids
                .iter()
                .map(|id| design_decision(id, "state", "Use hooks", &["Redux"]))
                .collect(),
            contradictions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn missing_side_cars_load_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = TaskPaths::new(temp.path());
        let history = load_review_history(&paths, "ft-1").await.expect("history");
        assert!(history.reviews.is_empty());
        let decisions = load_task_decisions(&paths, "t").await.expect("decisions");
        assert!(decisions.decisions.is_empty());
    }

    /// Recording the same decision twice keeps one binding copy in both documents.
    #[tokio::test]
    async fn recording_reviews_accumulates_and_dedupes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = TaskPaths::new(temp.path());
        record_review(&paths, "t", record("rev-1", &["dec-1"]))
            .await
            .expect("first");
        let history = record_review(&paths, "t", record("rev-2", &["dec-1", "dec-2"]))
            .await
            .expect("second");

        assert_eq!(history.reviews.len(), 2);
        assert_eq!(history.binding_decisions.len(), 2);

        let reloaded = load_review_history(&paths, "ft-1").await.expect("reload");
        assert_eq!(reloaded, history);
        let decisions = load_task_decisions(&paths, "t").await.expect("decisions");
        assert_eq!(decisions.decisions.len(), 2);
        assert_eq!(decisions.by_category["state"], vec!["dec-1", "dec-2"]);
    }
}

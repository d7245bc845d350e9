//! Goal tree load/save with schema + invariant validation.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::goals::GoalTree;
use crate::core::invariants::validate_goal_invariants;
use crate::io::documents::{read_text, save_json};

pub const GOALS_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/goals/v1.schema.json"
));

/// Load and validate the goal tree; a missing file is `None`.
pub async fn load_goals(path: &Path) -> Result<Option<GoalTree>> {
    let Some(contents) = read_text(path).await? else {
        return Ok(None);
    };
    let goals = parse_goals(&contents).with_context(|| format!("load goals {}", path.display()))?;
    debug!(
        path = %path.display(),
        milestones = goals.milestones.len(),
        features = goals.features().count(),
        "goal tree loaded"
    );
    Ok(Some(goals))
}

/// Like [`load_goals`], but a missing goal tree is an error.
pub async fn require_goals(path: &Path) -> Result<GoalTree> {
    load_goals(path)
        .await?
        .ok_or_else(|| anyhow!("missing goal tree {}", path.display()))
}

/// Parse goal tree JSON, then check it against the schema and invariants.
pub fn parse_goals(contents: &str) -> Result<GoalTree> {
    let value: Value = serde_json::from_str(contents).context("parse goal tree json")?;
    validate_schema(&value)?;
    let goals: GoalTree = serde_json::from_value(value).context("deserialize goal tree")?;
    validate_invariants(&goals)?;
    Ok(goals)
}

/// Validate and write a goal tree (used when a task is initialized).
pub async fn write_goals(path: &Path, goals: &GoalTree) -> Result<()> {
    validate_invariants(goals)?;
    save_json(path, goals).await
}

fn validate_schema(goals: &Value) -> Result<()> {
    let schema_value: Value =
        serde_json::from_str(GOALS_SCHEMA).context("parse embedded goals schema")?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(goals) {
        let messages = compiled
            .iter_errors(goals)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "goal tree schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn validate_invariants(goals: &GoalTree) -> Result<()> {
    let errors = validate_goal_invariants(goals);
    if errors.is_empty() {
        return Ok(());
    }
    Err(anyhow!("goal tree invariants failed: {}", errors.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{feature, goal_tree, milestone};

    /// Verifies write → load round-trip passes schema and invariant checks.
    #[tokio::test]
    async fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("goals.json");
        let goals = goal_tree(vec![milestone(
            "m-1",
            &[],
            vec![feature("ft-1", &[]), feature("ft-2", &["ft-1"])],
        )]);
        write_goals(&path, &goals).await.expect("write");
        let loaded = require_goals(&path).await.expect("load");
        assert_eq!(loaded, goals);
    }

    #[tokio::test]
    async fn missing_goals_is_absent_but_required_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("goals.json");
        assert!(load_goals(&path).await.expect("load").is_none());
        assert!(require_goals(&path).await.is_err());
    }

    #[test]
    fn schema_rejects_missing_test_command() {
        let json = r#"{
            "taskName": "t",
            "createdAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-01-01T00:00:00Z",
            "milestones": [{
                "id": "m-1", "name": "M", "subtasks": [{
                    "id": "s-1", "name": "S", "features": [{"id": "a", "description": "d"}]
                }]
            }]
        }"#;
        let err = parse_goals(json).expect_err("schema failure");
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn invariants_reject_cycles_at_load() {
        let goals = goal_tree(vec![milestone(
            "m-1",
            &[],
            vec![feature("a", &["b"]), feature("b", &["a"])],
        )]);
        let json = serde_json::to_string(&goals).expect("serialize");
        let err = parse_goals(&json).expect_err("cycle");
        assert!(err.to_string().contains("feature dependency cycle: a -> b -> a"));
    }
}

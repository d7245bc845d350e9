//! Goal tree: task → milestone → subtask → feature.
//!
//! The goal tree is written once by an external initializer and is read-only
//! to the engine. Field names follow the on-disk JSON contract (camelCase).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rough size estimate attached to a feature by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

/// Smallest test-verifiable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: String,
    pub description: String,
    /// Shell command whose success defines "done" for this feature.
    pub test_command: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub estimated_complexity: Complexity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskGoal {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneGoal {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Milestone ids that must be fully passing before this one is scheduled.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub requires_human_review: bool,
    #[serde(default)]
    pub completion_criteria: Vec<String>,
    pub subtasks: Vec<SubtaskGoal>,
}

impl MilestoneGoal {
    /// Features of this milestone in declaration order.
    pub fn features(&self) -> impl Iterator<Item = &Feature> {
        self.subtasks.iter().flat_map(|subtask| subtask.features.iter())
    }

    pub fn feature_count(&self) -> u32 {
        self.features().count() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalTree {
    pub task_name: String,
    #[serde(default)]
    pub task_description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub milestones: Vec<MilestoneGoal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferences: Vec<String>,
}

impl GoalTree {
    /// All features in scheduling order (milestone, subtask, feature).
    pub fn features(&self) -> impl Iterator<Item = &Feature> {
        self.milestones.iter().flat_map(MilestoneGoal::features)
    }

    pub fn find_feature(&self, feature_id: &str) -> Option<&Feature> {
        self.features().find(|feature| feature.id == feature_id)
    }

    pub fn find_milestone(&self, milestone_id: &str) -> Option<&MilestoneGoal> {
        self.milestones
            .iter()
            .find(|milestone| milestone.id == milestone_id)
    }

    /// Milestone that owns `feature_id`.
    pub fn milestone_of(&self, feature_id: &str) -> Option<&MilestoneGoal> {
        self.milestones
            .iter()
            .find(|milestone| milestone.features().any(|feature| feature.id == feature_id))
    }
}

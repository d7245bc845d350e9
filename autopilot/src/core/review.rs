//! Review records, design decisions and their accumulation rules.
//!
//! A decision that enters a feature's binding set stays there; merging only
//! ever adds decisions (de-duplicated by id).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::contradiction::Contradiction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    ChangesRequested,
    EscalateToHuman,
}

impl ReviewDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewDecision::Approved => "approved",
            ReviewDecision::ChangesRequested => "changes_requested",
            ReviewDecision::EscalateToHuman => "escalate_to_human",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Critical,
    Major,
    Minor,
    Suggestion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewIssue {
    pub severity: IssueSeverity,
    pub category: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ReviewIssue {
    pub fn critical(category: &str, description: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Critical,
            category: category.to_string(),
            description: description.into(),
            file: None,
            line: None,
            suggestion: None,
        }
    }
}

/// A decision as proposed by a reviewer, before it is stamped with ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedDecision {
    pub category: String,
    pub decision: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, rename = "alternatives_rejected", alias = "alternativesRejected")]
    pub alternatives_rejected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignDecision {
    pub id: String,
    pub category: String,
    pub decision: String,
    pub reasoning: String,
    #[serde(rename = "alternatives_rejected")]
    pub alternatives_rejected: Vec<String>,
    pub made_by: String,
    pub feature_id: String,
    pub review_id: String,
    pub timestamp: DateTime<Utc>,
}

/// What a quality reviewer returned for one review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewJudgment {
    pub decision: ReviewDecision,
    /// Reviewer confidence in `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub new_decisions: Vec<ProposedDecision>,
}

impl ReviewJudgment {
    /// Degraded judgment used when a reviewer cannot produce a usable verdict.
    pub fn escalation(feedback: impl Into<String>) -> Self {
        Self {
            decision: ReviewDecision::EscalateToHuman,
            confidence: 0.1,
            feedback: feedback.into(),
            issues: Vec::new(),
            suggestions: Vec::new(),
            new_decisions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub id: String,
    pub feature_id: String,
    pub timestamp: DateTime<Utc>,
    pub decision: ReviewDecision,
    pub confidence: f64,
    pub feedback: String,
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub decisions: Vec<DesignDecision>,
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureReviewHistory {
    pub feature_id: String,
    pub reviews: Vec<ReviewRecord>,
    pub binding_decisions: Vec<DesignDecision>,
}

impl FeatureReviewHistory {
    pub fn empty(feature_id: &str) -> Self {
        Self {
            feature_id: feature_id.to_string(),
            reviews: Vec::new(),
            binding_decisions: Vec::new(),
        }
    }
}

/// Append `record` and fold its decisions into the binding set.
pub fn add_review_record(
    history: &FeatureReviewHistory,
    record: ReviewRecord,
) -> FeatureReviewHistory {
    let mut next = history.clone();
    for decision in &record.decisions {
        if !next
            .binding_decisions
            .iter()
            .any(|existing| existing.id == decision.id)
        {
            next.binding_decisions.push(decision.clone());
        }
    }
    next.reviews.push(record);
    next
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDesignDecisions {
    pub task_id: String,
    pub decisions: Vec<DesignDecision>,
    /// category → decision ids
    pub by_category: BTreeMap<String, Vec<String>>,
    /// feature id → decision ids
    pub by_feature: BTreeMap<String, Vec<String>>,
}

impl TaskDesignDecisions {
    pub fn empty(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            decisions: Vec::new(),
            by_category: BTreeMap::new(),
            by_feature: BTreeMap::new(),
        }
    }

    pub fn for_category(&self, category: &str) -> Vec<&DesignDecision> {
        self.lookup(self.by_category.get(category))
    }

    pub fn for_feature(&self, feature_id: &str) -> Vec<&DesignDecision> {
        self.lookup(self.by_feature.get(feature_id))
    }

    fn lookup(&self, ids: Option<&Vec<String>>) -> Vec<&DesignDecision> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.decisions.iter().find(|decision| &decision.id == id))
            .collect()
    }
}

/// Merge decisions into the task-level aggregation, skipping known ids.
pub fn merge_task_decisions(
    existing: &TaskDesignDecisions,
    decisions: &[DesignDecision],
) -> TaskDesignDecisions {
    let mut next = existing.clone();
    for decision in decisions {
        if next.decisions.iter().any(|known| known.id == decision.id) {
            continue;
        }
        next.decisions.push(decision.clone());
        next.by_category
            .entry(decision.category.clone())
            .or_default()
            .push(decision.id.clone());
        next.by_feature
            .entry(decision.feature_id.clone())
            .or_default()
            .push(decision.id.clone());
    }
    next
}

/// Stamp reviewer proposals into durable decisions.
pub fn stamp_decisions<F>(
    proposed: &[ProposedDecision],
    feature_id: &str,
    review_id: &str,
    made_by: &str,
    at: DateTime<Utc>,
    mut next_id: F,
) -> Vec<DesignDecision>
where
    F: FnMut() -> String,
{
    proposed
        .iter()
        .map(|proposal| DesignDecision {
            id: next_id(),
            category: proposal.category.clone(),
            decision: proposal.decision.clone(),
            reasoning: proposal.reasoning.clone(),
            alternatives_rejected: proposal.alternatives_rejected.clone(),
            made_by: made_by.to_string(),
            feature_id: feature_id.to_string(),
            review_id: review_id.to_string(),
            timestamp: at,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::design_decision;

    fn record(id: &str, decisions: Vec<DesignDecision>) -> ReviewRecord {
        ReviewRecord {
            id: id.to_string(),
            feature_id: "ft-1".to_string(),
            timestamp: Utc::now(),
            decision: ReviewDecision::ChangesRequested,
            confidence: 0.8,
            feedback: String::new(),
            issues: Vec::new(),
            suggestions: Vec::new(),
            decisions,
            contradictions: Vec::new(),
        }
    }

    #[test]
    fn review_records_accumulate_binding_decisions_without_duplicates() {
        let d1 = design_decision("dec-1", "state", "Use hooks", &["Redux"]);
        let d2 = design_decision("dec-2", "api", "REST", &["GraphQL"]);

        let history = FeatureReviewHistory::empty("ft-1");
        let history = add_review_record(&history, record("rev-1", vec![d1.clone()]));
        let history = add_review_record(&history, record("rev-2", vec![d1.clone(), d2]));

        assert_eq!(history.reviews.len(), 2);
        let ids: Vec<&str> = history
            .binding_decisions
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(ids, vec!["dec-1", "dec-2"]);
    }

    #[test]
    fn task_decisions_are_indexed_by_category_and_feature() {
        let mut d1 = design_decision("dec-1", "state", "Use hooks", &["Redux"]);
        d1.feature_id = "ft-1".to_string();
        let mut d2 = design_decision("dec-2", "state", "Context for theme", &[]);
        d2.feature_id = "ft-2".to_string();

        let merged = merge_task_decisions(&TaskDesignDecisions::empty("t"), &[d1.clone(), d2]);
        let merged = merge_task_decisions(&merged, &[d1]);

        assert_eq!(merged.decisions.len(), 2);
        assert_eq!(merged.by_category["state"], vec!["dec-1", "dec-2"]);
        assert_eq!(merged.for_feature("ft-2")[0].decision, "Context for theme");
        assert!(merged.for_category("api").is_empty());
    }

    #[test]
    fn stamping_assigns_fresh_ids_and_provenance() {
        let proposed = vec![ProposedDecision {
            category: "state".to_string(),
            decision: "Use hooks".to_string(),
            reasoning: "simpler".to_string(),
            alternatives_rejected: vec!["Redux".to_string()],
        }];
        let mut counter = 0;
        let stamped = stamp_decisions(&proposed, "ft-1", "rev-9", "reviewer", Utc::now(), || {
            counter += 1;
            format!("dec-{counter}")
        });
        assert_eq!(stamped[0].id, "dec-1");
        assert_eq!(stamped[0].review_id, "rev-9");
        assert_eq!(stamped[0].feature_id, "ft-1");
        assert_eq!(stamped[0].alternatives_rejected, vec!["Redux"]);
    }

    /// The on-disk key for rejected alternatives is snake_case in both shapes.
    #[test]
    fn alternatives_rejected_key_is_stable() {
        let decision = design_decision("dec-1", "state", "Use hooks", &["Redux"]);
        let json = serde_json::to_value(&decision).expect("serialize");
        assert!(json.get("alternatives_rejected").is_some());
        assert!(json.get("madeBy").is_some());
    }
}

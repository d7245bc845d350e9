//! Review gate: the only path that finalizes a feature as `passing`.
//!
//! Stages run in order and stop at the first failing gate:
//! 1. the feature's own test command,
//! 2. the optional full regression suite,
//! 3. review history and binding decisions,
//! 4. the quality reviewer,
//! 5. the contradiction check against binding decisions.
//!
//! Every outcome, including a gate failure, is persisted as a `ReviewRecord`
//! before status is touched. Collaborator failures never escape as errors;
//! only caller-contract violations and document I/O do.

use std::path::Path;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::core::contradiction::{
    ContradictionCheckResult, ContradictionResolution, check_for_contradictions,
};
use crate::core::goals::{Feature, GoalTree};
use crate::core::progress::{ProgressEntry, ProgressKind};
use crate::core::review::{
    ReviewDecision, ReviewIssue, ReviewJudgment, ReviewRecord, stamp_decisions,
};
use crate::core::scheduler::is_task_complete;
use crate::core::status::{
    FeatureState, MilestoneState, TaskStatus, TransitionError, approve_feature,
    recalculate_milestone_status, reject_feature,
};
use crate::io::changes::ChangeSource;
use crate::io::goal_store::require_goals;
use crate::io::notifier::{Notification, Notifier};
use crate::io::paths::TaskPaths;
use crate::io::progress_log::append_progress_entry;
use crate::io::review_store::{load_review_history, record_review};
use crate::io::reviewer::{QualityReviewer, ReviewContext};
use crate::io::status_store::{load_status, update_status};
use crate::io::test_runner::TestRunner;

/// Identity recorded for verdicts produced by the test and regression gates.
const GATE_REVIEWER: &str = "review-gate";

/// Which stage produced the final verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStage {
    Tests,
    Regression,
    Reviewer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewOutcome {
    pub record: ReviewRecord,
    pub stage: ReviewStage,
    /// `None` when a gate short-circuited before the reviewer ran.
    pub contradictions: Option<ContradictionCheckResult>,
    /// Feature state after the transition.
    pub state: FeatureState,
    pub completed_milestones: Vec<String>,
    pub task_complete: bool,
}

impl ReviewOutcome {
    pub fn decision(&self) -> ReviewDecision {
        self.record.decision
    }
}

pub struct ReviewGate<'a> {
    paths: &'a TaskPaths,
    workdir: &'a Path,
    runner: &'a dyn TestRunner,
    reviewer: &'a dyn QualityReviewer,
    changes: &'a dyn ChangeSource,
    notifier: &'a dyn Notifier,
    regression_command: Option<String>,
}

impl<'a> ReviewGate<'a> {
    pub fn new(
        paths: &'a TaskPaths,
        workdir: &'a Path,
        runner: &'a dyn TestRunner,
        reviewer: &'a dyn QualityReviewer,
        changes: &'a dyn ChangeSource,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            paths,
            workdir,
            runner,
            reviewer,
            changes,
            notifier,
            regression_command: None,
        }
    }

    /// Full-suite command for the regression gate; `None` skips the gate.
    pub fn with_regression_command(mut self, command: Option<String>) -> Self {
        self.regression_command = command;
        self
    }

    /// Review a feature whose tests have passed (status `in_progress`).
    #[instrument(skip_all, fields(feature_id = %feature_id))]
    pub async fn review_feature(&self, feature_id: &str) -> Result<ReviewOutcome> {
        let goals = require_goals(&self.paths.goals_path).await?;
        let feature = goals
            .find_feature(feature_id)
            .ok_or_else(|| TransitionError::UnknownFeature(feature_id.to_string()))?;
        let status = load_status(&self.paths.status_path).await?.ok_or_else(|| {
            anyhow!(
                "no status at {}; run `autopilot init` first",
                self.paths.status_path.display()
            )
        })?;
        let current = status
            .state_of(feature_id)
            .ok_or_else(|| TransitionError::UnknownFeature(feature_id.to_string()))?;
        if current != FeatureState::InProgress {
            return Err(TransitionError::NotAwaitingReview {
                feature_id: feature_id.to_string(),
                current,
            }
            .into());
        }

        let review_id = format!("rev-{}", Uuid::new_v4().simple());
        let (stage, judgment, contradictions, made_by) = match self.run_gates(feature).await {
            Some((stage, judgment)) => (stage, judgment, None, GATE_REVIEWER),
            None => {
                let (judgment, check) = self.judge(&goals, feature).await?;
                (ReviewStage::Reviewer, judgment, Some(check), self.reviewer.name())
            }
        };

        let at = Utc::now();
        let decisions = stamp_decisions(
            &judgment.new_decisions,
            feature_id,
            &review_id,
            made_by,
            at,
            || format!("dec-{}", Uuid::new_v4().simple()),
        );
        let record = ReviewRecord {
            id: review_id,
            feature_id: feature_id.to_string(),
            timestamp: at,
            decision: judgment.decision,
            confidence: judgment.confidence,
            feedback: judgment.feedback,
            issues: judgment.issues,
            suggestions: judgment.suggestions,
            decisions,
            contradictions: contradictions
                .as_ref()
                .map(|check| check.contradictions.clone())
                .unwrap_or_default(),
        };
        record_review(self.paths, &status.task_id, record.clone()).await?;

        let before = status;
        let after = match record.decision {
            ReviewDecision::Approved => {
                update_status(&self.paths.status_path, |status| {
                    let next = approve_feature(status, feature_id, at)?;
                    Ok(recalculate_milestone_status(&next, &goals))
                })
                .await?
            }
            ReviewDecision::ChangesRequested => {
                update_status(&self.paths.status_path, |status| {
                    let next = reject_feature(status, feature_id, &record.feedback, at)?;
                    Ok(recalculate_milestone_status(&next, &goals))
                })
                .await?
            }
            ReviewDecision::EscalateToHuman => before.clone(),
        };

        let outcome = ReviewOutcome {
            stage,
            contradictions,
            state: after
                .state_of(feature_id)
                .unwrap_or(FeatureState::InProgress),
            completed_milestones: newly_passing_milestones(&before, &after),
            task_complete: record.decision == ReviewDecision::Approved
                && is_task_complete(&goals, &after),
            record,
        };
        self.narrate(&goals, &outcome, at).await?;
        self.announce(&goals, &outcome).await;

        info!(
            decision = outcome.record.decision.as_str(),
            stage = ?outcome.stage,
            state = outcome.state.as_str(),
            "review complete"
        );
        Ok(outcome)
    }

    /// Test and regression gates. `Some` means a gate failed.
    async fn run_gates(&self, feature: &Feature) -> Option<(ReviewStage, ReviewJudgment)> {
        let tests = self.runner.run(&feature.test_command, self.workdir).await;
        if !tests.passed {
            let summary = tests.failure_summary();
            return Some((
                ReviewStage::Tests,
                gate_failure(
                    "tests",
                    format!("Feature tests failed: {summary}"),
                    &tests.output,
                ),
            ));
        }

        let command = self.regression_command.as_deref()?;
        let suite = self.runner.run(command, self.workdir).await;
        if suite.passed {
            return None;
        }
        if suite.could_not_run() {
            warn!(
                command,
                error = %suite.failure_summary(),
                "regression suite could not run; treating as no regression"
            );
            return None;
        }
        Some((
            ReviewStage::Regression,
            gate_failure(
                "regression",
                format!("Regression suite failed: {}", suite.failure_summary()),
                &suite.output,
            ),
        ))
    }

    /// Reviewer verdict, overridden to an escalation by any direct contradiction.
    async fn judge(
        &self,
        goals: &GoalTree,
        feature: &Feature,
    ) -> Result<(ReviewJudgment, ContradictionCheckResult)> {
        let history = load_review_history(self.paths, &feature.id).await?;
        let changes = self.changes.changes(feature).await;
        let context = ReviewContext::build(goals, feature, &changes, &history);

        let mut judgment = self.reviewer.review(&context).await;
        let check = check_for_contradictions(
            &judgment.feedback,
            &judgment.issues,
            &history.binding_decisions,
        );
        if check.has_direct() && judgment.decision != ReviewDecision::EscalateToHuman {
            warn!(
                feature_id = %feature.id,
                reviewer_decision = judgment.decision.as_str(),
                contradictions = check.contradictions.len(),
                "review contradicts binding decisions; escalating"
            );
            judgment.decision = ReviewDecision::EscalateToHuman;
        } else if check.resolution == ContradictionResolution::Warn {
            warn!(
                feature_id = %feature.id,
                reviewer_decision = judgment.decision.as_str(),
                contradictions = check.contradictions.len(),
                "review criticizes binding decisions; keeping verdict"
            );
        }
        Ok((judgment, check))
    }

    async fn narrate(
        &self,
        goals: &GoalTree,
        outcome: &ReviewOutcome,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let record = &outcome.record;
        let feature_id = record.feature_id.as_str();
        let mut entries = Vec::new();

        match record.decision {
            ReviewDecision::Approved => {
                entries.push(with_contradictions(
                    ProgressEntry::new(ProgressKind::ReviewApproved, "Review approved.")
                        .feature(feature_id)
                        .detail("Review", &record.id)
                        .detail("Confidence", format!("{:.2}", record.confidence))
                        .detail("Feedback", &record.feedback),
                    record,
                ));
                entries.push(
                    ProgressEntry::new(ProgressKind::FeaturePassed, "Feature is passing.")
                        .feature(feature_id),
                );
                for milestone_id in &outcome.completed_milestones {
                    let milestone = goals.find_milestone(milestone_id);
                    let name = milestone.map_or(milestone_id.as_str(), |m| m.name.as_str());
                    entries.push(
                        ProgressEntry::new(
                            ProgressKind::MilestoneCompleted,
                            format!("Milestone {name} completed."),
                        )
                        .milestone(milestone_id),
                    );
                    if let Some(milestone) = milestone.filter(|m| m.requires_human_review) {
                        let mut signoff = ProgressEntry::new(
                            ProgressKind::HumanIntervention,
                            format!("Milestone {name} needs human sign-off."),
                        )
                        .milestone(milestone_id);
                        for criterion in &milestone.completion_criteria {
                            signoff = signoff.detail("Criterion", criterion);
                        }
                        entries.push(signoff);
                    }
                }
            }
            ReviewDecision::ChangesRequested => {
                entries.push(with_contradictions(
                    ProgressEntry::new(ProgressKind::ReviewRejected, "Changes requested.")
                        .feature(feature_id)
                        .detail("Review", &record.id)
                        .detail("Stage", stage_label(outcome.stage))
                        .detail("Feedback", &record.feedback)
                        .detail("Issues", record.issues.len()),
                    record,
                ));
            }
            ReviewDecision::EscalateToHuman => {
                entries.push(with_contradictions(
                    ProgressEntry::new(
                        ProgressKind::ReviewEscalated,
                        if record.contradictions.is_empty() {
                            "Review escalated to a human."
                        } else {
                            "Review contradicts binding decisions; escalated to a human."
                        },
                    )
                    .feature(feature_id)
                    .detail("Review", &record.id)
                    .detail("Confidence", format!("{:.2}", record.confidence))
                    .detail("Feedback", &record.feedback),
                    record,
                ));
                entries.push(
                    ProgressEntry::new(
                        ProgressKind::HumanIntervention,
                        format!("Awaiting a human decision on {feature_id}."),
                    )
                    .feature(feature_id),
                );
            }
        }

        for entry in entries {
            append_progress_entry(&self.paths.progress_path, &entry.at(at)).await?;
        }
        Ok(())
    }

    async fn announce(&self, goals: &GoalTree, outcome: &ReviewOutcome) {
        let feature_id = outcome.record.feature_id.clone();
        match outcome.record.decision {
            ReviewDecision::Approved => {
                self.notifier
                    .notify(&Notification::FeatureApproved { feature_id })
                    .await;
                for milestone_id in &outcome.completed_milestones {
                    self.notifier
                        .notify(&Notification::MilestoneCompleted {
                            milestone_id: milestone_id.clone(),
                        })
                        .await;
                    if let Some(milestone) = goals
                        .find_milestone(milestone_id)
                        .filter(|m| m.requires_human_review)
                    {
                        self.notifier
                            .notify(&Notification::MilestoneReviewRequested {
                                milestone_id: milestone_id.clone(),
                                criteria: milestone.completion_criteria.clone(),
                            })
                            .await;
                    }
                }
                if outcome.task_complete {
                    self.notifier
                        .notify(&Notification::TaskCompleted {
                            task_name: goals.task_name.clone(),
                        })
                        .await;
                }
            }
            ReviewDecision::EscalateToHuman => {
                self.notifier
                    .notify(&Notification::HumanReviewRequested {
                        feature_id,
                        reason: outcome.record.feedback.clone(),
                    })
                    .await;
            }
            ReviewDecision::ChangesRequested => {}
        }
    }
}

fn with_contradictions(mut entry: ProgressEntry, record: &ReviewRecord) -> ProgressEntry {
    for contradiction in &record.contradictions {
        entry = entry.detail("Contradiction", &contradiction.explanation);
    }
    entry
}

fn gate_failure(category: &str, feedback: String, output: &str) -> ReviewJudgment {
    let mut issue = ReviewIssue::critical(category, feedback.clone());
    let output = output.trim();
    if !output.is_empty() {
        issue.suggestion = Some(tail(output, GATE_OUTPUT_TAIL_CHARS));
    }
    ReviewJudgment {
        decision: ReviewDecision::ChangesRequested,
        confidence: 1.0,
        feedback,
        issues: vec![issue],
        suggestions: Vec::new(),
        new_decisions: Vec::new(),
    }
}

const GATE_OUTPUT_TAIL_CHARS: usize = 2_000;

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(max_chars)).collect()
}

fn stage_label(stage: ReviewStage) -> &'static str {
    match stage {
        ReviewStage::Tests => "tests",
        ReviewStage::Regression => "regression",
        ReviewStage::Reviewer => "reviewer",
    }
}

fn newly_passing_milestones(before: &TaskStatus, after: &TaskStatus) -> Vec<String> {
    after
        .milestones
        .iter()
        .filter(|(_, milestone)| milestone.status == MilestoneState::Passing)
        .filter(|(id, _)| {
            before
                .milestones
                .get(*id)
                .is_none_or(|prior| prior.status != MilestoneState::Passing)
        })
        .map(|(id, _)| id.clone())
        .collect()
}

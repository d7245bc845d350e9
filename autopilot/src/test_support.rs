//! Test-only builders, scripted collaborators and a temp task fixture.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::core::goals::{Complexity, Feature, GoalTree, MilestoneGoal, SubtaskGoal};
use crate::core::progress::ledger_header;
use crate::core::review::{DesignDecision, ReviewDecision, ReviewJudgment};
use crate::core::status::{FeatureState, TaskStatus, initialize_status};
use crate::core::types::TestResult;
use crate::io::changes::{ChangeSource, ChangeSummary};
use crate::io::notifier::{Notification, Notifier};
use crate::io::paths::TaskPaths;
use crate::io::reviewer::{QualityReviewer, ReviewContext};
use crate::io::test_runner::TestRunner;

/// Feature with a unique, shell-runnable test command (`true # <id>`).
pub fn feature(id: &str, depends_on: &[&str]) -> Feature {
    Feature {
        id: id.to_string(),
        description: format!("{id} description"),
        test_command: format!("true # {id}"),
        depends_on: depends_on.iter().map(|dep| dep.to_string()).collect(),
        estimated_complexity: Complexity::Medium,
    }
}

/// Milestone with a single subtask `<id>-sub` holding `features`.
pub fn milestone(id: &str, depends_on: &[&str], features: Vec<Feature>) -> MilestoneGoal {
    MilestoneGoal {
        id: id.to_string(),
        name: format!("{id} name"),
        description: String::new(),
        depends_on: depends_on.iter().map(|dep| dep.to_string()).collect(),
        requires_human_review: false,
        completion_criteria: Vec::new(),
        subtasks: vec![SubtaskGoal {
            id: format!("{id}-sub"),
            name: format!("{id} subtask"),
            description: String::new(),
            features,
        }],
    }
}

pub fn goal_tree(milestones: Vec<MilestoneGoal>) -> GoalTree {
    let now = Utc::now();
    GoalTree {
        task_name: "Test task".to_string(),
        task_description: String::new(),
        created_at: now,
        updated_at: now,
        milestones,
        constraints: Vec::new(),
        preferences: Vec::new(),
    }
}

/// Overwrite a feature's state directly, bypassing transition rules.
pub fn force_state(status: &mut TaskStatus, feature_id: &str, state: FeatureState) {
    status
        .features
        .get_mut(feature_id)
        .unwrap_or_else(|| panic!("unknown feature {feature_id}"))
        .status = state;
}

pub fn design_decision(
    id: &str,
    category: &str,
    decision: &str,
    alternatives_rejected: &[&str],
) -> DesignDecision {
    DesignDecision {
        id: id.to_string(),
        category: category.to_string(),
        decision: decision.to_string(),
        reasoning: String::new(),
        alternatives_rejected: alternatives_rejected.iter().map(|a| a.to_string()).collect(),
        made_by: "reviewer".to_string(),
        feature_id: "ft-1".to_string(),
        review_id: "rev-0".to_string(),
        timestamp: Utc::now(),
    }
}

/// Test runner answering from per-command queues; unscripted commands pass.
#[derive(Debug, Default)]
pub struct ScriptedTestRunner {
    scripts: Mutex<HashMap<String, VecDeque<TestResult>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue results for `command`, consumed in order.
    pub fn script(self, command: &str, results: Vec<TestResult>) -> Self {
        self.scripts
            .lock()
            .expect("scripts lock")
            .entry(command.to_string())
            .or_default()
            .extend(results);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl TestRunner for ScriptedTestRunner {
    async fn run(&self, command: &str, _workdir: &Path) -> TestResult {
        self.calls
            .lock()
            .expect("calls lock")
            .push(command.to_string());
        self.scripts
            .lock()
            .expect("scripts lock")
            .get_mut(command)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| TestResult::passed(5, "ok"))
    }
}

/// Reviewer answering from a queue; an empty queue approves.
#[derive(Debug, Default)]
pub struct ScriptedReviewer {
    judgments: Mutex<VecDeque<ReviewJudgment>>,
    contexts: Mutex<Vec<ReviewContext>>,
}

impl ScriptedReviewer {
    pub fn new(judgments: Vec<ReviewJudgment>) -> Self {
        Self {
            judgments: Mutex::new(judgments.into()),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn approving() -> Self {
        Self::default()
    }

    /// Contexts this reviewer was called with.
    pub fn contexts(&self) -> Vec<ReviewContext> {
        self.contexts.lock().expect("contexts lock").clone()
    }
}

pub fn judgment(decision: ReviewDecision, feedback: &str) -> ReviewJudgment {
    ReviewJudgment {
        decision,
        confidence: 0.9,
        feedback: feedback.to_string(),
        issues: Vec::new(),
        suggestions: Vec::new(),
        new_decisions: Vec::new(),
    }
}

#[async_trait]
impl QualityReviewer for ScriptedReviewer {
    fn name(&self) -> &str {
        "scripted-reviewer"
    }

    async fn review(&self, context: &ReviewContext) -> ReviewJudgment {
        self.contexts
            .lock()
            .expect("contexts lock")
            .push(context.clone());
        self.judgments
            .lock()
            .expect("judgments lock")
            .pop_front()
            .unwrap_or_else(|| judgment(ReviewDecision::Approved, "looks good"))
    }
}

/// Change source returning a fixed summary.
#[derive(Debug, Clone, Default)]
pub struct StaticChangeSource(pub ChangeSummary);

#[async_trait]
impl ChangeSource for StaticChangeSource {
    async fn changes(&self, _feature: &Feature) -> ChangeSummary {
        self.0.clone()
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier lock").clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) {
        self.sent
            .lock()
            .expect("notifier lock")
            .push(notification.clone());
    }
}

/// A task directory in a temp dir with goals, fresh status and a ledger header.
pub struct TestTask {
    _temp: tempfile::TempDir,
    pub paths: TaskPaths,
    pub goals: GoalTree,
}

impl TestTask {
    pub fn new(goals: GoalTree) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = TaskPaths::new(temp.path().join("task"));
        std::fs::create_dir_all(&paths.task_dir).expect("create task dir");
        write_json(&paths.goals_path, &goals);
        write_json(
            &paths.status_path,
            &initialize_status(&paths.task_id(), &goals, 3),
        );
        std::fs::write(&paths.progress_path, ledger_header(&goals.task_name))
            .expect("write ledger header");
        Self {
            _temp: temp,
            paths,
            goals,
        }
    }

    /// Directory that stands in for the project checkout.
    pub fn workdir(&self) -> PathBuf {
        self.paths.task_dir.clone()
    }

    pub fn ledger(&self) -> String {
        std::fs::read_to_string(&self.paths.progress_path).expect("read ledger")
    }

    pub fn status(&self) -> TaskStatus {
        let contents = std::fs::read_to_string(&self.paths.status_path).expect("read status");
        serde_json::from_str(&contents).expect("parse status")
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) {
    let contents = serde_json::to_string_pretty(value).expect("serialize");
    std::fs::write(path, contents).expect("write json");
}

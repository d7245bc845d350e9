//! End-to-end lifecycle tests over a real task directory.
//!
//! These drive selection, verification, the review gate and session
//! hydration with scripted collaborators to check that state transitions,
//! ledger narration and completion detection line up across commands.

use autopilot::core::progress::{ProgressEntry, ProgressKind, parse_progress};
use autopilot::core::review::ReviewDecision;
use autopilot::core::status::{FeatureState, MilestoneState};
use autopilot::core::types::TestResult;
use autopilot::io::config::EngineConfig;
use autopilot::io::progress_log::{append_progress_entry, read_feature_attempts};
use autopilot::review_gate::ReviewGate;
use autopilot::select::{SelectOutcome, select_from_task};
use autopilot::session::{SessionInit, initialize_session};
use autopilot::test_support::{
    RecordingNotifier, ScriptedReviewer, ScriptedTestRunner, StaticChangeSource, TestTask,
    feature, goal_tree, judgment, milestone,
};
use autopilot::verify::run_feature_tests;

async fn selected(task: &TestTask) -> Option<String> {
    match select_from_task(&task.paths).await.expect("select") {
        SelectOutcome::Open(feature) => Some(feature.id),
        SelectOutcome::Complete | SelectOutcome::Blocked { .. } => None,
    }
}

/// Full lifecycle: ft-2 depends on ft-1 inside one milestone.
///
/// Execution sequence:
/// 1. Select ft-1 → verify (fails) → verify (passes) → review approves
/// 2. Select ft-2 → verify (passes) → review approves
/// 3. Task complete: milestone passing, session reports complete
#[tokio::test]
async fn features_flow_through_verify_and_review_to_completion() {
    let task = TestTask::new(goal_tree(vec![milestone(
        "m-1",
        &[],
        vec![feature("ft-1", &[]), feature("ft-2", &["ft-1"])],
    )]));
    let workdir = task.workdir();
    let runner = ScriptedTestRunner::new().script(
        "true # ft-1",
        vec![
            TestResult::failed(7, Some(1), "1 test failed"),
            TestResult::passed(6, "ok"),
        ],
    );
    let reviewer = ScriptedReviewer::approving();
    let changes = StaticChangeSource::default();
    let notifier = RecordingNotifier::default();
    let gate = ReviewGate::new(&task.paths, &workdir, &runner, &reviewer, &changes, &notifier);

    assert_eq!(selected(&task).await.as_deref(), Some("ft-1"));
    let first = run_feature_tests(&task.paths, "ft-1", &runner, &notifier, &workdir)
        .await
        .expect("verify ft-1");
    assert_eq!(first.state, FeatureState::Failing);
    assert_eq!(selected(&task).await.as_deref(), Some("ft-1"));

    let second = run_feature_tests(&task.paths, "ft-1", &runner, &notifier, &workdir)
        .await
        .expect("verify ft-1 again");
    assert_eq!(second.state, FeatureState::InProgress);
    assert_eq!(second.attempts, 2);

    let review = gate.review_feature("ft-1").await.expect("review ft-1");
    assert_eq!(review.decision(), ReviewDecision::Approved);
    assert!(!review.task_complete);
    assert_eq!(selected(&task).await.as_deref(), Some("ft-2"));

    run_feature_tests(&task.paths, "ft-2", &runner, &notifier, &workdir)
        .await
        .expect("verify ft-2");
    let review = gate.review_feature("ft-2").await.expect("review ft-2");
    assert!(review.task_complete);
    assert_eq!(review.completed_milestones, vec!["m-1".to_string()]);

    let status = task.status();
    assert_eq!(status.milestones["m-1"].status, MilestoneState::Passing);
    assert_eq!(status.milestones["m-1"].passing, 2);
    assert_eq!(
        select_from_task(&task.paths).await.expect("select"),
        SelectOutcome::Complete
    );

    let init = initialize_session(&task.paths, &EngineConfig::default())
        .await
        .expect("session");
    assert!(matches!(init, SessionInit::Complete { .. }));

    // Two attempts, one failure and one pass for ft-1.
    assert_eq!(
        read_feature_attempts(&task.paths.progress_path, "ft-1")
            .await
            .expect("attempts"),
        4
    );
    let labels: Vec<String> = parse_progress(&task.ledger())
        .into_iter()
        .map(|entry| entry.label)
        .collect();
    assert_eq!(
        labels.iter().filter(|l| *l == "Milestone Completed").count(),
        1
    );
    assert_eq!(labels.last().map(String::as_str), Some("Session Start"));
}

/// A rejected review sends the feature back; the next pass can be approved.
#[tokio::test]
async fn rejection_then_rework_is_approved() {
    let task = TestTask::new(goal_tree(vec![milestone(
        "m-1",
        &[],
        vec![feature("ft-1", &[])],
    )]));
    let workdir = task.workdir();
    let runner = ScriptedTestRunner::new();
    let reviewer = ScriptedReviewer::new(vec![
        judgment(ReviewDecision::ChangesRequested, "missing input validation"),
        judgment(ReviewDecision::Approved, "validation added"),
    ]);
    let changes = StaticChangeSource::default();
    let notifier = RecordingNotifier::default();
    let gate = ReviewGate::new(&task.paths, &workdir, &runner, &reviewer, &changes, &notifier);

    run_feature_tests(&task.paths, "ft-1", &runner, &notifier, &workdir)
        .await
        .expect("verify");
    let rejected = gate.review_feature("ft-1").await.expect("first review");
    assert_eq!(rejected.state, FeatureState::Failing);
    assert_eq!(
        task.status().feature("ft-1").and_then(|f| f.last_error.clone()),
        Some("missing input validation".to_string())
    );

    run_feature_tests(&task.paths, "ft-1", &runner, &notifier, &workdir)
        .await
        .expect("verify again");
    let approved = gate.review_feature("ft-1").await.expect("second review");
    assert_eq!(approved.state, FeatureState::Passing);
    assert!(approved.task_complete);

    let contexts = reviewer.contexts();
    assert_eq!(contexts[1].prior_reviews.len(), 1);
    assert_eq!(
        contexts[1].prior_reviews[0].decision,
        ReviewDecision::ChangesRequested
    );
}

/// Concurrent appends never interleave inside an entry.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ledger_appends_stay_parseable() {
    let task = TestTask::new(goal_tree(vec![milestone(
        "m-1",
        &[],
        vec![feature("ft-1", &[])],
    )]));

    let mut handles = Vec::new();
    for n in 0..40 {
        let path = task.paths.progress_path.clone();
        handles.push(tokio::spawn(async move {
            let entry = ProgressEntry::new(ProgressKind::FeatureAttempt, format!("attempt {n}"))
                .feature("ft-1")
                .detail("Worker", n);
            append_progress_entry(&path, &entry).await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("append");
    }

    let entries = parse_progress(&task.ledger());
    assert_eq!(entries.len(), 40);
    for n in 0..40 {
        let needle = format!("attempt {n}\n");
        assert_eq!(
            entries.iter().filter(|e| e.body.contains(&needle)).count(),
            1,
            "entry {n}"
        );
    }
    assert!(entries.iter().all(|e| e.feature_id() == Some("ft-1")));
}

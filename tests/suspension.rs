//! Suspension protocol: resume semantics, restart safety, and the review
//! deadline sweeper.

mod common;

use common::*;
use chrono::{Duration, Utc};
use serde_json::json;

use fablegraph::runtime::{Checkpointer, EngineConfig, EngineError, RunOutcome, SYSTEM_TIMEOUT_REVIEWER};
use fablegraph::types::JobStatus;

fn terminal_state(outcome: RunOutcome) -> (JobStatus, fablegraph::state::StoryState) {
    match outcome {
        RunOutcome::Terminal { status, state } => (status, state),
        RunOutcome::Suspended { .. } => panic!("expected terminal outcome"),
    }
}

#[tokio::test]
async fn suspension_payload_carries_the_review_packet() {
    let fakes = FakeProviders::default();
    let (engine, store) = story_engine(&fakes, EngineConfig::default());

    let outcome = engine
        .submit(images_only_state("job-1", "a mouse finds cheese", 2), "t-1")
        .await
        .unwrap();
    let RunOutcome::Suspended { payload } = outcome else {
        panic!("expected suspension");
    };
    assert_eq!(payload["job_id"], "job-1");
    assert_eq!(payload["story_title"], "The Cheese Quest");
    assert_eq!(payload["image_urls"].as_array().unwrap().len(), 2);

    // The suspension is part of the snapshot, not a side channel.
    let checkpoint = store.load_latest("t-1").await.unwrap().unwrap();
    assert_eq!(checkpoint.status, JobStatus::AwaitingReview);
    let suspension = checkpoint.suspension.expect("suspension persisted");
    assert_eq!(suspension.payload, payload);
}

#[tokio::test]
async fn submit_on_suspended_thread_returns_pending_payload() {
    let fakes = FakeProviders::default();
    let (engine, _store) = story_engine(&fakes, EngineConfig::default());

    let first = engine
        .submit(images_only_state("job-1", "a mouse finds cheese", 2), "t-1")
        .await
        .unwrap();
    let second = engine
        .submit(images_only_state("job-1", "a mouse finds cheese", 2), "t-1")
        .await
        .unwrap();
    match (first, second) {
        (RunOutcome::Suspended { payload: a }, RunOutcome::Suspended { payload: b }) => {
            assert_eq!(a, b);
        }
        other => panic!("expected two suspensions, got {other:?}"),
    }
}

#[tokio::test]
async fn resume_unknown_thread_is_an_error() {
    let fakes = FakeProviders::default();
    let (engine, _store) = story_engine(&fakes, EngineConfig::default());

    let err = engine
        .resume("ghost", json!({"decision": "approved"}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ThreadNotFound { .. }));
}

#[tokio::test]
async fn resume_without_suspension_is_an_error() {
    let fakes = FakeProviders::default();
    fakes.moderation.flag_containing("duel", &["violence"]);
    let (engine, _store) = story_engine(&fakes, EngineConfig::default());

    // This thread auto-rejects and terminates without suspending.
    engine
        .submit(images_only_state("job-2", "a duel", 2), "t-2")
        .await
        .unwrap();
    let err = engine
        .resume("t-2", json!({"decision": "approved"}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotSuspended { .. }));
}

#[tokio::test]
async fn resume_across_process_restart_matches_in_process_result() {
    let fakes = FakeProviders::default();
    let (engine_a, store) = story_engine(&fakes, EngineConfig::default());

    // In-process reference run.
    engine_a
        .submit(images_only_state("job-6", "a mouse finds cheese", 2), "t-a")
        .await
        .unwrap();
    let reference = engine_a
        .resume("t-a", json!({"decision": "approved", "reviewer_id": "rev-9"}))
        .await
        .unwrap();
    let (reference_status, reference_state) = terminal_state(reference);

    // Same submission on a second thread, suspended by engine A...
    engine_a
        .submit(images_only_state("job-6", "a mouse finds cheese", 2), "t-b")
        .await
        .unwrap();

    // ...then the process "restarts": a brand-new engine over the same
    // checkpoint store resumes from durable state alone.
    let engine_b = story_engine_with_store(&fakes, EngineConfig::default(), store);
    let resumed = engine_b
        .resume("t-b", json!({"decision": "approved", "reviewer_id": "rev-9"}))
        .await
        .unwrap();
    let (resumed_status, resumed_state) = terminal_state(resumed);

    assert_eq!(resumed_status, reference_status);
    assert_eq!(resumed_state, reference_state);
}

#[tokio::test]
async fn completed_nodes_are_not_reentered_on_resume() {
    let fakes = FakeProviders::default();
    let (engine, store) = story_engine(&fakes, EngineConfig::default());

    engine
        .submit(images_only_state("job-9", "a mouse finds cheese", 2), "t-9")
        .await
        .unwrap();
    let calls_at_suspension = fakes.text.call_log().len();
    let images_at_suspension = fakes.image.prompts.lock().unwrap().len();

    let checkpoint = store.load_latest("t-9").await.unwrap().unwrap();
    assert!(checkpoint
        .completed_nodes
        .iter()
        .any(|n| n.to_string() == "story_writer"));

    engine
        .resume("t-9", json!({"decision": "approved"}))
        .await
        .unwrap();

    // Resume re-enters only the review gate: no generation re-runs.
    assert_eq!(fakes.text.call_log().len(), calls_at_suspension);
    assert_eq!(fakes.image.prompts.lock().unwrap().len(), images_at_suspension);
}

#[tokio::test]
async fn expired_reviews_are_swept_to_rejection() {
    let fakes = FakeProviders::default();
    let config = EngineConfig {
        review_deadline: Duration::zero(),
        ..EngineConfig::default()
    };
    let (engine, store) = story_engine(&fakes, config);

    engine
        .submit(images_only_state("job-10", "a mouse finds cheese", 2), "t-10")
        .await
        .unwrap();

    let swept = engine
        .sweep_expired_reviews(Utc::now() + Duration::seconds(5))
        .await
        .unwrap();
    assert_eq!(swept, vec!["t-10".to_string()]);

    let checkpoint = store.load_latest("t-10").await.unwrap().unwrap();
    assert_eq!(checkpoint.status, JobStatus::Rejected);
    assert_eq!(
        checkpoint.state.reviewer_id.as_deref(),
        Some(SYSTEM_TIMEOUT_REVIEWER)
    );

    // Threads still inside their deadline are left alone.
    let swept_again = engine
        .sweep_expired_reviews(Utc::now() - Duration::days(1))
        .await
        .unwrap();
    assert!(swept_again.is_empty());
}

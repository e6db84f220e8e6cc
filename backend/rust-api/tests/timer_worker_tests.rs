use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use examroom_api::services::exam_engine::{
    AnswerOption, ExamEngine, ExamQuestion, Phase, SessionConfig, SubmitTrigger,
};
use examroom_api::services::session_registry::{
    AttemptContext, LiveAttempt, SessionRegistry, SUBMITTED_RETENTION,
};
use examroom_api::services::submission_sink::{FinishedAttempt, SubmissionSink};
use examroom_api::services::timer_worker::spawn_countdown;

#[derive(Default)]
struct RecordingSink {
    deliveries: AtomicUsize,
    last: StdMutex<Option<(String, SubmitTrigger, usize)>>,
}

#[async_trait]
impl SubmissionSink for RecordingSink {
    async fn deliver(&self, finished: &FinishedAttempt) -> anyhow::Result<()> {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some((
            finished.attempt_id.clone(),
            finished.payload.trigger,
            finished.payload.answers.len(),
        ));
        Ok(())
    }
}

fn config(duration_seconds: u32) -> SessionConfig {
    SessionConfig {
        questions: vec![ExamQuestion {
            id: "q1".to_string(),
            stem: "question q1".to_string(),
            difficulty: None,
            options: vec![
                AnswerOption {
                    label: "A".to_string(),
                    content: "option A".to_string(),
                },
                AnswerOption {
                    label: "B".to_string(),
                    content: "option B".to_string(),
                },
            ],
        }],
        duration_seconds,
    }
}

fn context(attempt_id: &str) -> AttemptContext {
    AttemptContext {
        attempt_id: attempt_id.to_string(),
        exam_id: "exam-1".to_string(),
        user_id: "user-1".to_string(),
        exam_title: "Sample exam".to_string(),
        passing_score: 70.0,
        answer_key: HashMap::from([("q1".to_string(), "A".to_string())]),
        started_at: Utc::now(),
    }
}

#[tokio::test(start_paused = true)]
async fn countdown_expiry_delivers_exactly_once() {
    let registry = Arc::new(SessionRegistry::new());
    let sink = Arc::new(RecordingSink::default());
    let engine = ExamEngine::new(config(2)).unwrap();
    let live = Arc::new(Mutex::new(LiveAttempt::new(context("a1"), engine)));
    registry.insert("a1", live.clone()).await;

    let handle = spawn_countdown(
        "a1".to_string(),
        live.clone(),
        registry.clone(),
        sink.clone(),
        Duration::from_secs(1),
    );

    // The paused clock auto-advances through the worker's sleeps.
    tokio::time::sleep(Duration::from_secs(3)).await;
    handle.await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(sink.deliveries.load(Ordering::SeqCst), 1);
    let last = sink.last.lock().unwrap().clone();
    assert_eq!(
        last,
        Some(("a1".to_string(), SubmitTrigger::TimeExpired, 1))
    );

    let attempt = live.lock().await;
    assert_eq!(attempt.engine.phase(), Phase::Submitted);
    assert_eq!(attempt.engine.remaining_seconds(), 0);
    drop(attempt);

    // Still resolvable during the retention window for late reads.
    assert!(registry.get("a1").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn submitted_attempt_is_evicted_after_retention() {
    let registry = Arc::new(SessionRegistry::new());
    let sink = Arc::new(RecordingSink::default());
    let engine = ExamEngine::new(config(1)).unwrap();
    let live = Arc::new(Mutex::new(LiveAttempt::new(context("a2"), engine)));
    registry.insert("a2", live.clone()).await;

    let handle = spawn_countdown(
        "a2".to_string(),
        live,
        registry.clone(),
        sink,
        Duration::from_secs(1),
    );
    handle.await.unwrap();

    tokio::time::sleep(SUBMITTED_RETENTION + Duration::from_secs(1)).await;
    assert!(registry.get("a2").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn manual_submission_stops_the_countdown() {
    let registry = Arc::new(SessionRegistry::new());
    let sink = Arc::new(RecordingSink::default());
    let engine = ExamEngine::new(config(60)).unwrap();
    let live = Arc::new(Mutex::new(LiveAttempt::new(context("a3"), engine)));
    registry.insert("a3", live.clone()).await;

    let handle = spawn_countdown(
        "a3".to_string(),
        live.clone(),
        registry.clone(),
        sink.clone(),
        Duration::from_secs(1),
    );

    tokio::time::sleep(Duration::from_millis(2500)).await;
    {
        let mut attempt = live.lock().await;
        assert_eq!(attempt.engine.remaining_seconds(), 58);
        let outcome = attempt.engine.confirm_submit();
        assert!(outcome.first);
    }

    // The next tick observes the submitted phase and the worker exits
    // without a second submission.
    handle.await.unwrap();
    assert_eq!(sink.deliveries.load(Ordering::SeqCst), 0);

    let attempt = live.lock().await;
    assert_eq!(attempt.engine.phase(), Phase::Submitted);
}

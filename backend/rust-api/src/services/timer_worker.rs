use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::metrics::{ATTEMPTS_ACTIVE, ATTEMPTS_TOTAL};
use crate::services::exam_engine::TickOutcome;
use crate::services::session_registry::{LiveAttempt, SessionRegistry, SUBMITTED_RETENTION};
use crate::services::submission_sink::{dispatch, SubmissionSink};

/// Drives one attempt's countdown: a dedicated task calling the engine's
/// `tick` once per interval through the attempt mutex. The task is the
/// only autonomous source of mutation for the session and tears itself
/// down when the engine reports expiry or an already-submitted phase;
/// the manual submit path additionally aborts the task's handle so no
/// timer outlives its attempt.
pub fn spawn_countdown(
    attempt_id: String,
    live: Arc<Mutex<LiveAttempt>>,
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn SubmissionSink>,
    tick_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(tick_interval).await;
            let mut guard = live.lock().await;
            match guard.engine.tick() {
                TickOutcome::Running { remaining_seconds } => {
                    tracing::trace!(
                        "Countdown tick: attempt={}, remaining={}s",
                        attempt_id,
                        remaining_seconds
                    );
                }
                TickOutcome::Closed => break,
                TickOutcome::Expired(payload) => {
                    let finished = guard.finish(payload, Utc::now());
                    guard.timer = None;
                    drop(guard);

                    ATTEMPTS_TOTAL.with_label_values(&["auto_submitted"]).inc();
                    ATTEMPTS_ACTIVE.dec();
                    tracing::info!("Attempt auto-submitted on expiry: {}", attempt_id);

                    dispatch(sink, finished);
                    registry.evict_later(attempt_id, SUBMITTED_RETENTION);
                    break;
                }
            }
        }
    })
}

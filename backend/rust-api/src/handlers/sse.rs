use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use chrono::Utc;
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::{
    metrics::SSE_CONNECTIONS_ACTIVE,
    models::timer::{TimeExpired, TimerEvent, TimerTick},
    services::{
        exam_engine::Phase,
        session_registry::LiveAttempt,
        AppState,
    },
};

/// Keeps the active-connection gauge honest: decremented when the stream
/// state is dropped, whether the stream ended or the client disconnected.
struct ConnectionGuard;

impl ConnectionGuard {
    fn new() -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        Self
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
    }
}

/// SSE endpoint for countdown events
/// GET /api/v1/attempts/{id}/stream
pub async fn attempt_stream(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!("Client connected to SSE stream: attempt={}", attempt_id);

    let live = state
        .registry
        .get(&attempt_id)
        .await
        .ok_or((StatusCode::NOT_FOUND, "Attempt not found".to_string()))?;

    let tick_interval = Duration::from_millis(state.config.tick_interval_ms);
    let stream = create_timer_stream(attempt_id, live, tick_interval);

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Emits the live engine's countdown: one `timer-tick` per interval while
/// the attempt is open and one final `time-expired` when the countdown
/// runs out. A manually submitted attempt closes the stream without a
/// final event; the submit response already told that client everything.
fn create_timer_stream(
    attempt_id: String,
    live: Arc<Mutex<LiveAttempt>>,
    tick_interval: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let guard = ConnectionGuard::new();
    stream::unfold(
        (attempt_id, live, guard, false),
        move |(attempt_id, live, guard, final_sent)| async move {
            if final_sent {
                return None;
            }

            let (remaining, total, phase) = {
                let attempt = live.lock().await;
                (
                    attempt.engine.remaining_seconds(),
                    attempt.engine.duration_seconds(),
                    attempt.engine.phase(),
                )
            };

            if phase == Phase::Submitted {
                if remaining == 0 {
                    let expired_event = TimerEvent::TimeExpired(TimeExpired {
                        attempt_id: attempt_id.clone(),
                        timestamp: Utc::now(),
                        message: "Time limit exceeded".to_string(),
                    });

                    let event = Event::default()
                        .event(expired_event.event_name())
                        .data(expired_event.to_sse_data());

                    tracing::info!("Timer expired: attempt={}", attempt_id);
                    return Some((Ok(event), (attempt_id, live, guard, true)));
                }
                return None;
            }

            let tick_event = TimerEvent::TimerTick(TimerTick {
                attempt_id: attempt_id.clone(),
                remaining_seconds: remaining,
                elapsed_seconds: total.saturating_sub(remaining),
                total_seconds: total,
                timestamp: Utc::now(),
            });

            let event = Event::default()
                .event(tick_event.event_name())
                .data(tick_event.to_sse_data());

            // Wait one interval before reading the engine again
            sleep(tick_interval).await;

            Some((Ok(event), (attempt_id, live, guard, false)))
        },
    )
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::services::exam_engine::{ExamEngine, SubmissionPayload};
use crate::services::submission_sink::FinishedAttempt;

/// How long a submitted attempt stays resolvable in the registry so that
/// late snapshot reads and open SSE streams still see the terminal phase.
pub const SUBMITTED_RETENTION: Duration = Duration::from_secs(300);

/// Immutable per-attempt metadata established at start. The answer key
/// never enters the engine; it travels to the submission sink only.
pub struct AttemptContext {
    pub attempt_id: String,
    pub exam_id: String,
    pub user_id: String,
    pub exam_title: String,
    pub passing_score: f64,
    pub answer_key: HashMap<String, String>,
    pub started_at: DateTime<Utc>,
}

/// One in-flight attempt: its engine, metadata and countdown task. The
/// surrounding `Mutex` is the single-writer serialization point; every
/// mutation of the engine goes through it.
pub struct LiveAttempt {
    pub context: AttemptContext,
    pub engine: ExamEngine,
    pub timer: Option<JoinHandle<()>>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl LiveAttempt {
    pub fn new(context: AttemptContext, engine: ExamEngine) -> Self {
        Self {
            context,
            engine,
            timer: None,
            submitted_at: None,
        }
    }

    /// Bundles the frozen payload with the attempt metadata for the
    /// submission sink, recording the submission instant.
    pub fn finish(
        &mut self,
        payload: SubmissionPayload,
        submitted_at: DateTime<Utc>,
    ) -> FinishedAttempt {
        self.submitted_at = Some(submitted_at);
        FinishedAttempt {
            attempt_id: self.context.attempt_id.clone(),
            exam_id: self.context.exam_id.clone(),
            user_id: self.context.user_id.clone(),
            passing_score: self.context.passing_score,
            answer_key: self.context.answer_key.clone(),
            payload,
            started_at: self.context.started_at,
            submitted_at,
        }
    }
}

/// In-memory map of live attempts. Exam state never touches Redis or
/// MongoDB while an attempt is open; only the finished record is persisted.
#[derive(Default)]
pub struct SessionRegistry {
    attempts: RwLock<HashMap<String, Arc<Mutex<LiveAttempt>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, attempt_id: &str, live: Arc<Mutex<LiveAttempt>>) {
        self.attempts
            .write()
            .await
            .insert(attempt_id.to_string(), live);
    }

    pub async fn get(&self, attempt_id: &str) -> Option<Arc<Mutex<LiveAttempt>>> {
        self.attempts.read().await.get(attempt_id).cloned()
    }

    pub async fn remove(&self, attempt_id: &str) -> Option<Arc<Mutex<LiveAttempt>>> {
        self.attempts.write().await.remove(attempt_id)
    }

    pub async fn active_count(&self) -> usize {
        self.attempts.read().await.len()
    }

    /// Schedules removal of a submitted attempt after the retention window.
    pub fn evict_later(self: Arc<Self>, attempt_id: String, after: Duration) {
        let registry = self;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if registry.remove(&attempt_id).await.is_some() {
                tracing::debug!("Evicted submitted attempt from registry: {}", attempt_id);
            }
        });
    }
}

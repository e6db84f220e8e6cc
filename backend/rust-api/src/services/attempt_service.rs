use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use mongodb::bson::doc;
use mongodb::Database;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::metrics::{
    record_cache_hit, record_cache_miss, track_cache_operation, ANSWERS_RECORDED_TOTAL,
    ATTEMPTS_ACTIVE, ATTEMPTS_TOTAL,
};
use crate::models::{
    AttemptRecord, AttemptSnapshot, NavigateRequest, SelectAnswerRequest, StartAttemptRequest,
    StartAttemptResponse, SubmitReceipt,
};
use crate::services::exam_engine::{EngineError, ExamEngine};
use crate::services::exam_loader::ExamLoader;
use crate::services::session_registry::{
    AttemptContext, LiveAttempt, SessionRegistry, SUBMITTED_RETENTION,
};
use crate::services::submission_sink::{dispatch, SubmissionSink};
use crate::services::timer_worker::spawn_countdown;
use crate::services::AppState;

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("Exam not found: {0}")]
    ExamNotFound(String),
    #[error("Attempt not found: {0}")]
    AttemptNotFound(String),
    #[error("Attempt cooldown active, retry in {retry_after_seconds}s")]
    CooldownActive { retry_after_seconds: i64 },
    #[error("Maximum attempts reached for this exam")]
    AttemptLimitReached,
    #[error("Attempt result not available yet: {0}")]
    ResultNotReady(String),
    #[error("Exam definition is invalid: {0}")]
    InvalidExam(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Orchestrates attempt lifecycle around the in-memory engines: start
/// checks and exam loading, pass-through of engine operations under the
/// per-attempt mutex, and the single sink handoff on submission.
pub struct AttemptService {
    config: Config,
    mongo: Database,
    redis: ConnectionManager,
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn SubmissionSink>,
}

impl AttemptService {
    pub fn new(state: &AppState) -> Self {
        Self {
            config: state.config.clone(),
            mongo: state.mongo.clone(),
            redis: state.redis.clone(),
            registry: state.registry.clone(),
            sink: state.sink.clone(),
        }
    }

    pub async fn start_attempt(
        &self,
        req: StartAttemptRequest,
    ) -> Result<StartAttemptResponse, AttemptError> {
        self.check_cooldown(&req.user_id, &req.exam_id).await?;
        self.check_attempt_limit(&req.user_id, &req.exam_id).await?;

        let loaded = ExamLoader::new(self.mongo.clone())
            .load(&req.exam_id)
            .await?;
        let duration_seconds = loaded.config.duration_seconds;
        let engine = ExamEngine::new(loaded.config)?;

        let attempt_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let expires_at = started_at + chrono::Duration::seconds(i64::from(duration_seconds));

        let context = AttemptContext {
            attempt_id: attempt_id.clone(),
            exam_id: loaded.exam_id.clone(),
            user_id: req.user_id.clone(),
            exam_title: loaded.title.clone(),
            passing_score: loaded.passing_score,
            answer_key: loaded.answer_key,
            started_at,
        };

        let live = Arc::new(Mutex::new(LiveAttempt::new(context, engine)));
        self.registry.insert(&attempt_id, live.clone()).await;

        let handle = spawn_countdown(
            attempt_id.clone(),
            live.clone(),
            self.registry.clone(),
            self.sink.clone(),
            std::time::Duration::from_millis(self.config.tick_interval_ms),
        );
        live.lock().await.timer = Some(handle);

        self.mark_cooldown(&req.user_id, &req.exam_id).await?;

        ATTEMPTS_TOTAL.with_label_values(&["started"]).inc();
        ATTEMPTS_ACTIVE.inc();
        tracing::info!(
            "Attempt started: {} for user {} on exam {}",
            attempt_id,
            req.user_id,
            loaded.exam_id
        );

        Ok(StartAttemptResponse {
            attempt_id,
            exam_id: loaded.exam_id,
            title: loaded.title,
            duration_seconds,
            started_at,
            expires_at,
            questions: loaded.questions,
        })
    }

    pub async fn select_answer(
        &self,
        attempt_id: &str,
        req: &SelectAnswerRequest,
    ) -> Result<AttemptSnapshot, AttemptError> {
        let live = self.live(attempt_id).await?;
        let mut guard = live.lock().await;
        match &req.option_label {
            Some(label) => guard.engine.select_answer(&req.question_id, label)?,
            None => {
                guard.engine.cycle_answer(&req.question_id)?;
            }
        }
        ANSWERS_RECORDED_TOTAL.inc();
        Ok(Self::snapshot_of(&guard))
    }

    pub async fn navigate(
        &self,
        attempt_id: &str,
        req: &NavigateRequest,
    ) -> Result<AttemptSnapshot, AttemptError> {
        let live = self.live(attempt_id).await?;
        let mut guard = live.lock().await;
        match (req.index, req.direction) {
            (Some(index), _) => {
                guard.engine.go_to(index)?;
            }
            (None, Some(direction)) => {
                guard.engine.navigate(direction)?;
            }
            (None, None) => {
                return Err(AttemptError::InvalidRequest(
                    "navigate requires either direction or index".to_string(),
                ));
            }
        }
        Ok(Self::snapshot_of(&guard))
    }

    pub async fn request_submit(&self, attempt_id: &str) -> Result<AttemptSnapshot, AttemptError> {
        let live = self.live(attempt_id).await?;
        let mut guard = live.lock().await;
        guard.engine.request_submit()?;
        Ok(Self::snapshot_of(&guard))
    }

    pub async fn cancel_submit(&self, attempt_id: &str) -> Result<AttemptSnapshot, AttemptError> {
        let live = self.live(attempt_id).await?;
        let mut guard = live.lock().await;
        guard.engine.cancel_submit();
        Ok(Self::snapshot_of(&guard))
    }

    /// Performs the manual submission. The engine guarantees at most one
    /// transition to `Submitted`; only that first transition stops the
    /// countdown and hands the payload to the submission sink. Repeat
    /// calls return the already-frozen answers.
    pub async fn confirm_submit(&self, attempt_id: &str) -> Result<SubmitReceipt, AttemptError> {
        let live = self.live(attempt_id).await?;
        let mut guard = live.lock().await;
        let outcome = guard.engine.confirm_submit();
        let submitted_at = guard.submitted_at.unwrap_or_else(Utc::now);

        if outcome.first {
            let finished = guard.finish(outcome.payload.clone(), submitted_at);
            let timer = guard.timer.take();
            drop(guard);

            if let Some(handle) = timer {
                handle.abort();
            }
            ATTEMPTS_TOTAL.with_label_values(&["submitted"]).inc();
            ATTEMPTS_ACTIVE.dec();
            tracing::info!("Attempt submitted: {}", attempt_id);

            dispatch(self.sink.clone(), finished);
            self.registry
                .clone()
                .evict_later(attempt_id.to_string(), SUBMITTED_RETENTION);
        }

        Ok(SubmitReceipt {
            attempt_id: attempt_id.to_string(),
            trigger: outcome.payload.trigger,
            submitted_at,
            answers: outcome.payload.answers,
        })
    }

    pub async fn snapshot(&self, attempt_id: &str) -> Result<AttemptSnapshot, AttemptError> {
        let live = self.live(attempt_id).await?;
        let guard = live.lock().await;
        Ok(Self::snapshot_of(&guard))
    }

    /// Graded result lookup: Redis cache first, then the persisted record.
    pub async fn attempt_result(&self, attempt_id: &str) -> Result<AttemptRecord, AttemptError> {
        let mut conn = self.redis.clone();
        let cache_key = format!("attempt:result:{attempt_id}");
        let cached: Option<String> = redis::cmd("GET")
            .arg(&cache_key)
            .query_async(&mut conn)
            .await
            .context("Failed to read attempt result cache")?;

        if let Some(json) = cached {
            record_cache_hit();
            let record =
                serde_json::from_str(&json).context("Failed to deserialize cached result")?;
            return Ok(record);
        }
        record_cache_miss();

        let collection: mongodb::Collection<AttemptRecord> =
            self.mongo.collection("exam_attempts");
        let record = collection
            .find_one(doc! { "_id": attempt_id })
            .await
            .context("Failed to query exam_attempts collection")?;

        match record {
            Some(record) => Ok(record),
            // A live attempt has no record yet; distinguish "still being
            // graded or not submitted" from "never existed".
            None => {
                if self.registry.get(attempt_id).await.is_some() {
                    Err(AttemptError::ResultNotReady(attempt_id.to_string()))
                } else {
                    Err(AttemptError::AttemptNotFound(attempt_id.to_string()))
                }
            }
        }
    }

    async fn live(&self, attempt_id: &str) -> Result<Arc<Mutex<LiveAttempt>>, AttemptError> {
        self.registry
            .get(attempt_id)
            .await
            .ok_or_else(|| AttemptError::AttemptNotFound(attempt_id.to_string()))
    }

    fn snapshot_of(guard: &LiveAttempt) -> AttemptSnapshot {
        AttemptSnapshot {
            attempt_id: guard.context.attempt_id.clone(),
            exam_id: guard.context.exam_id.clone(),
            state: guard.engine.snapshot(),
        }
    }

    async fn check_cooldown(&self, user_id: &str, exam_id: &str) -> Result<(), AttemptError> {
        if self.config.attempt_cooldown_seconds <= 0 {
            return Ok(());
        }
        let mut conn = self.redis.clone();
        let key = Self::cooldown_key(user_id, exam_id);
        let ttl: i64 = redis::cmd("TTL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .context("Failed to check attempt cooldown")?;
        if ttl > 0 {
            return Err(AttemptError::CooldownActive {
                retry_after_seconds: ttl,
            });
        }
        Ok(())
    }

    async fn mark_cooldown(&self, user_id: &str, exam_id: &str) -> Result<(), AttemptError> {
        if self.config.attempt_cooldown_seconds <= 0 {
            return Ok(());
        }
        let mut conn = self.redis.clone();
        let key = Self::cooldown_key(user_id, exam_id);
        let cooldown = self.config.attempt_cooldown_seconds;
        track_cache_operation("setex", async {
            redis::cmd("SETEX")
                .arg(&key)
                .arg(cooldown)
                .arg(1)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to set attempt cooldown")
        })
        .await?;
        Ok(())
    }

    async fn check_attempt_limit(&self, user_id: &str, exam_id: &str) -> Result<(), AttemptError> {
        let collection: mongodb::Collection<AttemptRecord> =
            self.mongo.collection("exam_attempts");
        let count = collection
            .count_documents(doc! { "user_id": user_id, "exam_id": exam_id })
            .await
            .context("Failed to count previous attempts")?;
        if count >= self.config.max_attempts {
            tracing::warn!(
                "Attempt limit reached: user={}, exam={}, attempts={}",
                user_id,
                exam_id,
                count
            );
            return Err(AttemptError::AttemptLimitReached);
        }
        Ok(())
    }

    fn cooldown_key(user_id: &str, exam_id: &str) -> String {
        format!("attempt:cooldown:{user_id}:{exam_id}")
    }
}

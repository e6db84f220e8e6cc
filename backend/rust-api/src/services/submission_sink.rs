use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::Database;
use redis::aio::ConnectionManager;

use crate::metrics::{track_cache_operation, SUBMISSION_DELIVERIES_TOTAL};
use crate::models::{AttemptRecord, GradedAnswer};
use crate::services::exam_engine::SubmissionPayload;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// Everything the downstream grading/persistence side needs about one
/// terminal submission. Produced exactly once per attempt, by either the
/// manual confirm path or the countdown expiry path.
pub struct FinishedAttempt {
    pub attempt_id: String,
    pub exam_id: String,
    pub user_id: String,
    pub passing_score: f64,
    pub answer_key: HashMap<String, String>,
    pub payload: SubmissionPayload,
    pub started_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
}

/// Downstream collaborator receiving finalized submissions. The engine
/// side never waits on delivery and never rolls back a submission when
/// delivery fails.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn deliver(&self, finished: &FinishedAttempt) -> Result<()>;
}

/// Hands a finished attempt to the sink in the background. Failures are
/// logged and counted; the attempt stays submitted regardless, so a lost
/// record surfaces as a sync problem rather than a reopened exam.
pub fn dispatch(sink: Arc<dyn SubmissionSink>, finished: FinishedAttempt) {
    tokio::spawn(async move {
        match sink.deliver(&finished).await {
            Ok(()) => {
                SUBMISSION_DELIVERIES_TOTAL
                    .with_label_values(&["success"])
                    .inc();
                tracing::info!("Submission delivered: attempt={}", finished.attempt_id);
            }
            Err(e) => {
                SUBMISSION_DELIVERIES_TOTAL
                    .with_label_values(&["error"])
                    .inc();
                tracing::error!(
                    "Submission delivery failed for attempt {}: {:#}",
                    finished.attempt_id,
                    e
                );
            }
        }
    });
}

/// Grades the frozen payload against the exam's answer key. Unanswered
/// questions count as incorrect.
pub fn grade(finished: &FinishedAttempt) -> AttemptRecord {
    let answers: Vec<GradedAnswer> = finished
        .payload
        .answers
        .iter()
        .map(|a| {
            let correct = match (&a.selected_option, finished.answer_key.get(&a.question_id)) {
                (Some(selected), Some(key)) => selected == key,
                _ => false,
            };
            GradedAnswer {
                question_id: a.question_id.clone(),
                selected_option: a.selected_option.clone(),
                correct,
            }
        })
        .collect();

    let total_questions = answers.len() as u32;
    let correct_count = answers.iter().filter(|a| a.correct).count() as u32;
    let score_pct = if total_questions == 0 {
        0.0
    } else {
        f64::from(correct_count) / f64::from(total_questions) * 100.0
    };

    AttemptRecord {
        attempt_id: finished.attempt_id.clone(),
        exam_id: finished.exam_id.clone(),
        user_id: finished.user_id.clone(),
        trigger: finished.payload.trigger,
        answers,
        correct_count,
        total_questions,
        score_pct,
        passed: score_pct >= finished.passing_score,
        started_at: finished.started_at,
        submitted_at: finished.submitted_at,
        time_taken_seconds: (finished.submitted_at - finished.started_at).num_seconds(),
    }
}

/// Production sink: grades the submission, persists the record to the
/// `exam_attempts` collection with aggressive retries and caches the
/// graded result in Redis for the result endpoint.
pub struct GradedMongoSink {
    mongo: Database,
    redis: ConnectionManager,
}

impl GradedMongoSink {
    pub fn new(mongo: Database, redis: ConnectionManager) -> Self {
        Self { mongo, redis }
    }
}

#[async_trait]
impl SubmissionSink for GradedMongoSink {
    async fn deliver(&self, finished: &FinishedAttempt) -> Result<()> {
        let record = grade(finished);

        let collection: mongodb::Collection<AttemptRecord> =
            self.mongo.collection("exam_attempts");
        retry_async_with_config(RetryConfig::aggressive(), || async {
            collection.insert_one(&record).await.map(|_| ())
        })
        .await
        .map_err(|e: mongodb::error::Error| anyhow::anyhow!(e))
        .context("Failed to persist attempt record")?;

        let mut conn = self.redis.clone();
        let cache_key = format!("attempt:result:{}", record.attempt_id);
        let json =
            serde_json::to_string(&record).context("Failed to serialize attempt record")?;
        track_cache_operation("setex", async {
            redis::cmd("SETEX")
                .arg(&cache_key)
                .arg(86400) // 24 hours
                .arg(&json)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to cache attempt result")
        })
        .await?;

        tracing::info!(
            "Attempt record persisted: id={}, score={:.1}, passed={}",
            record.attempt_id,
            record.score_pct,
            record.passed
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::exam_engine::{SubmitTrigger, SubmittedAnswer};

    fn finished(answers: Vec<SubmittedAnswer>, key: &[(&str, &str)]) -> FinishedAttempt {
        let started_at = Utc::now();
        FinishedAttempt {
            attempt_id: "attempt-1".to_string(),
            exam_id: "exam-1".to_string(),
            user_id: "user-1".to_string(),
            passing_score: 70.0,
            answer_key: key
                .iter()
                .map(|(q, l)| (q.to_string(), l.to_string()))
                .collect(),
            payload: SubmissionPayload {
                trigger: SubmitTrigger::Manual,
                answers,
            },
            started_at,
            submitted_at: started_at + chrono::Duration::seconds(90),
        }
    }

    fn answer(question_id: &str, selected: Option<&str>) -> SubmittedAnswer {
        SubmittedAnswer {
            question_id: question_id.to_string(),
            selected_option: selected.map(|s| s.to_string()),
        }
    }

    #[test]
    fn grades_correct_and_unanswered() {
        let finished = finished(
            vec![
                answer("q1", Some("B")),
                answer("q2", Some("A")),
                answer("q3", None),
            ],
            &[("q1", "B"), ("q2", "C"), ("q3", "A")],
        );
        let record = grade(&finished);

        assert_eq!(record.total_questions, 3);
        assert_eq!(record.correct_count, 1);
        assert!((record.score_pct - 33.333).abs() < 0.01);
        assert!(!record.passed);
        assert!(record.answers[0].correct);
        assert!(!record.answers[1].correct);
        assert!(!record.answers[2].correct);
        assert_eq!(record.time_taken_seconds, 90);
    }

    #[test]
    fn passes_at_threshold() {
        let finished = finished(
            vec![
                answer("q1", Some("A")),
                answer("q2", Some("B")),
                answer("q3", Some("C")),
                answer("q4", None),
            ],
            &[("q1", "A"), ("q2", "B"), ("q3", "C"), ("q4", "D")],
        );
        let record = grade(&finished);

        assert_eq!(record.correct_count, 3);
        assert_eq!(record.score_pct, 75.0);
        assert!(record.passed);
    }
}

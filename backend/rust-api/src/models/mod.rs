use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::services::exam_engine::{
    EngineSnapshot, NavDirection, SubmitTrigger, SubmittedAnswer,
};

#[derive(Debug, Deserialize, Validate)]
pub struct StartAttemptRequest {
    #[validate(length(min = 1, message = "user_id must not be empty"))]
    pub user_id: String,
    #[validate(length(min = 1, message = "exam_id must not be empty"))]
    pub exam_id: String,
}

/// Question as shown to the candidate: the correct-answer flags carried by
/// the stored exam document are stripped before anything leaves the server.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub question_id: String,
    pub stem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    pub options: Vec<OptionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionView {
    pub label: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct StartAttemptResponse {
    pub attempt_id: String,
    pub exam_id: String,
    pub title: String,
    pub duration_seconds: u32,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub questions: Vec<QuestionView>,
}

/// Selects an option for a question. Omitting `option_label` cycles to the
/// next option of that question instead (the spacebar shortcut).
#[derive(Debug, Deserialize)]
pub struct SelectAnswerRequest {
    pub question_id: String,
    pub option_label: Option<String>,
}

/// Moves the current-question pointer. Exactly one of `direction` and
/// `index` is expected; `index` wins when both are present.
#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub direction: Option<NavDirection>,
    pub index: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct AttemptSnapshot {
    pub attempt_id: String,
    pub exam_id: String,
    #[serde(flatten)]
    pub state: EngineSnapshot,
}

/// Returned from the confirm endpoint and mirrored by the auto-submit SSE
/// path: the frozen answer set, one entry per configured question.
#[derive(Debug, Serialize)]
pub struct SubmitReceipt {
    pub attempt_id: String,
    pub trigger: SubmitTrigger,
    pub submitted_at: DateTime<Utc>,
    pub answers: Vec<SubmittedAnswer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradedAnswer {
    pub question_id: String,
    pub selected_option: Option<String>,
    pub correct: bool,
}

/// Graded attempt record as persisted in the `exam_attempts` collection
/// and cached in Redis by the submission sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    #[serde(rename = "_id")]
    pub attempt_id: String,
    pub exam_id: String,
    pub user_id: String,
    pub trigger: SubmitTrigger,
    pub answers: Vec<GradedAnswer>,
    pub correct_count: u32,
    pub total_questions: u32,
    pub score_pct: f64,
    pub passed: bool,
    pub started_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub time_taken_seconds: i64,
}

pub mod exam;
pub mod timer;

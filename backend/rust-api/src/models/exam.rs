use serde::{Deserialize, Serialize};

pub const DEFAULT_PASSING_SCORE: f64 = 70.0;

/// Exam definition as stored in the `exams` collection. Authoring happens
/// elsewhere; this service only reads these documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub passing_score: Option<f64>,
    pub questions: Vec<QuestionDocument>,
}

impl ExamDocument {
    pub fn passing_score(&self) -> f64 {
        self.passing_score.unwrap_or(DEFAULT_PASSING_SCORE)
    }

    pub fn duration_seconds(&self) -> u32 {
        self.duration_minutes * 60
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionDocument {
    pub question_id: String,
    pub stem: String,
    #[serde(default)]
    pub difficulty: Option<String>,
    pub options: Vec<OptionDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionDocument {
    pub label: String,
    pub content: String,
    #[serde(default)]
    pub correct: bool,
}

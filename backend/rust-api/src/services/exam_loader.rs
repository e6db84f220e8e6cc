use std::collections::HashMap;

use anyhow::Context;
use mongodb::Database;

use crate::models::exam::ExamDocument;
use crate::models::{OptionView, QuestionView};
use crate::services::attempt_service::AttemptError;
use crate::services::exam_engine::{AnswerOption, ExamQuestion, SessionConfig};

/// Exam definition resolved for one attempt: the engine-facing config (no
/// correct answers), the answer key for the submission sink and sanitized
/// question views for the start response.
pub struct LoadedExam {
    pub exam_id: String,
    pub title: String,
    pub passing_score: f64,
    pub config: SessionConfig,
    pub answer_key: HashMap<String, String>,
    pub questions: Vec<QuestionView>,
}

pub struct ExamLoader {
    mongo: Database,
}

impl ExamLoader {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    pub async fn load(&self, exam_id: &str) -> Result<LoadedExam, AttemptError> {
        let collection: mongodb::Collection<ExamDocument> = self.mongo.collection("exams");
        let exam = collection
            .find_one(mongodb::bson::doc! { "_id": exam_id })
            .await
            .context("Failed to query exams collection")?
            .ok_or_else(|| AttemptError::ExamNotFound(exam_id.to_string()))?;

        tracing::debug!(
            "Loaded exam {}: {} questions, {} minutes",
            exam.id,
            exam.questions.len(),
            exam.duration_minutes
        );

        Self::assemble(exam)
    }

    fn assemble(exam: ExamDocument) -> Result<LoadedExam, AttemptError> {
        let mut answer_key = HashMap::new();
        let mut questions = Vec::with_capacity(exam.questions.len());
        let mut views = Vec::with_capacity(exam.questions.len());

        for question in &exam.questions {
            let correct: Vec<&str> = question
                .options
                .iter()
                .filter(|o| o.correct)
                .map(|o| o.label.as_str())
                .collect();
            if correct.len() != 1 {
                return Err(AttemptError::InvalidExam(format!(
                    "question {} must have exactly one correct option, found {}",
                    question.question_id,
                    correct.len()
                )));
            }
            answer_key.insert(question.question_id.clone(), correct[0].to_string());

            questions.push(ExamQuestion {
                id: question.question_id.clone(),
                stem: question.stem.clone(),
                difficulty: question.difficulty.clone(),
                options: question
                    .options
                    .iter()
                    .map(|o| AnswerOption {
                        label: o.label.clone(),
                        content: o.content.clone(),
                    })
                    .collect(),
            });
            views.push(QuestionView {
                question_id: question.question_id.clone(),
                stem: question.stem.clone(),
                difficulty: question.difficulty.clone(),
                options: question
                    .options
                    .iter()
                    .map(|o| OptionView {
                        label: o.label.clone(),
                        content: o.content.clone(),
                    })
                    .collect(),
            });
        }

        let config = SessionConfig {
            questions,
            duration_seconds: exam.duration_seconds(),
        };
        let passing_score = exam.passing_score();

        Ok(LoadedExam {
            exam_id: exam.id,
            title: exam.title,
            passing_score,
            config,
            answer_key,
            questions: views,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exam::{OptionDocument, QuestionDocument};

    fn option(label: &str, correct: bool) -> OptionDocument {
        OptionDocument {
            label: label.to_string(),
            content: format!("option {label}"),
            correct,
        }
    }

    fn exam(questions: Vec<QuestionDocument>) -> ExamDocument {
        ExamDocument {
            id: "exam-1".to_string(),
            title: "Sample exam".to_string(),
            description: None,
            duration_minutes: 20,
            passing_score: None,
            questions,
        }
    }

    #[test]
    fn assembles_config_key_and_views() {
        let loaded = ExamLoader::assemble(exam(vec![QuestionDocument {
            question_id: "q1".to_string(),
            stem: "What is 2 + 2?".to_string(),
            difficulty: Some("easy".to_string()),
            options: vec![option("A", false), option("B", true)],
        }]))
        .unwrap();

        assert_eq!(loaded.config.duration_seconds, 1200);
        assert_eq!(loaded.passing_score, 70.0);
        assert_eq!(loaded.answer_key.get("q1").map(String::as_str), Some("B"));
        assert_eq!(loaded.questions.len(), 1);
        assert_eq!(loaded.questions[0].options.len(), 2);
    }

    #[test]
    fn rejects_question_without_correct_option() {
        let result = ExamLoader::assemble(exam(vec![QuestionDocument {
            question_id: "q1".to_string(),
            stem: "Broken".to_string(),
            difficulty: None,
            options: vec![option("A", false), option("B", false)],
        }]));

        assert!(matches!(result, Err(AttemptError::InvalidExam(_))));
    }

    #[test]
    fn rejects_question_with_two_correct_options() {
        let result = ExamLoader::assemble(exam(vec![QuestionDocument {
            question_id: "q1".to_string(),
            stem: "Broken".to_string(),
            difficulty: None,
            options: vec![option("A", true), option("B", true)],
        }]));

        assert!(matches!(result, Err(AttemptError::InvalidExam(_))));
    }
}

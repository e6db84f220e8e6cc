use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::time::format_clock;

/// One selectable option of a multiple-choice question. Labels come from a
/// small fixed alphabet ("A".."D" in practice) and are unique per question.
#[derive(Debug, Clone)]
pub struct AnswerOption {
    pub label: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ExamQuestion {
    pub id: String,
    pub stem: String,
    pub difficulty: Option<String>,
    pub options: Vec<AnswerOption>,
}

/// Immutable input of one attempt. Question order is the display and
/// navigation order and stays stable for the lifetime of the session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub questions: Vec<ExamQuestion>,
    pub duration_seconds: u32,
}

impl SessionConfig {
    fn validate(&self) -> Result<(), EngineError> {
        if self.questions.is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "exam has no questions".to_string(),
            ));
        }
        if self.duration_seconds == 0 {
            return Err(EngineError::InvalidConfiguration(
                "exam duration must be positive".to_string(),
            ));
        }

        let mut question_ids = HashSet::new();
        for question in &self.questions {
            if !question_ids.insert(question.id.as_str()) {
                return Err(EngineError::InvalidConfiguration(format!(
                    "duplicate question id: {}",
                    question.id
                )));
            }
            if question.options.is_empty() {
                return Err(EngineError::InvalidConfiguration(format!(
                    "question {} has no options",
                    question.id
                )));
            }
            let mut labels = HashSet::new();
            for option in &question.options {
                if !labels.insert(option.label.as_str()) {
                    return Err(EngineError::InvalidConfiguration(format!(
                        "question {} has duplicate option label {}",
                        question.id, option.label
                    )));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Running,
    ConfirmingSubmit,
    Submitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavDirection {
    Previous,
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitTrigger {
    Manual,
    TimeExpired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub question_id: String,
    pub selected_option: Option<String>,
}

/// The final, complete answer set handed to the submission sink. Contains
/// one entry per configured question, in configuration order; unanswered
/// questions carry `selected_option: None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub trigger: SubmitTrigger,
    pub answers: Vec<SubmittedAnswer>,
}

/// Result of a `confirm_submit` call. `first` is true only for the call
/// that actually performed the transition to `Submitted`; callers must
/// only hand the payload to the submission sink when it is set.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub payload: SubmissionPayload,
    pub first: bool,
}

/// Result of a single countdown tick.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Countdown advanced, session still open.
    Running { remaining_seconds: u32 },
    /// The countdown reached zero on this call: the one automatic
    /// submission. Returned exactly once per session.
    Expired(SubmissionPayload),
    /// Session already submitted; the tick was a no-op.
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid exam configuration: {0}")]
    InvalidConfiguration(String),
    #[error("invalid selection for question {question_id}: {}", option_label.as_deref().unwrap_or("<none>"))]
    InvalidSelection {
        question_id: String,
        option_label: Option<String>,
    },
    #[error("exam session is closed")]
    SessionClosed,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionProgress {
    pub question_id: String,
    pub answered: bool,
    pub selected_option: Option<String>,
}

/// Read-only view of the session sufficient for a frontend to render the
/// exam header, navigator sidebar and countdown.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub phase: Phase,
    pub current_index: usize,
    pub question_count: usize,
    pub answered_count: usize,
    pub fully_answered: bool,
    pub remaining_seconds: u32,
    pub remaining_clock: String,
    pub questions: Vec<QuestionProgress>,
}

/// State machine for exactly one timed exam attempt.
///
/// All operations are synchronous and validate-then-apply: a rejected call
/// leaves the state untouched. The engine owns its state exclusively; the
/// caller is responsible for serializing access (one mutex per live
/// attempt) and for driving `tick` once per second from a countdown task.
/// The engine never grades and never performs I/O.
pub struct ExamEngine {
    questions: Vec<ExamQuestion>,
    duration_seconds: u32,
    current_index: usize,
    answers: HashMap<String, String>,
    remaining_seconds: u32,
    phase: Phase,
    submitted: Option<SubmissionPayload>,
}

impl ExamEngine {
    pub fn new(config: SessionConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            duration_seconds: config.duration_seconds,
            remaining_seconds: config.duration_seconds,
            questions: config.questions,
            current_index: 0,
            answers: HashMap::new(),
            phase: Phase::Running,
            submitted: None,
        })
    }

    /// Records `option_label` as the selected answer for `question_id`.
    /// A later selection for the same question overwrites the earlier one;
    /// there is never more than one selected option per question.
    pub fn select_answer(
        &mut self,
        question_id: &str,
        option_label: &str,
    ) -> Result<(), EngineError> {
        if self.phase != Phase::Running {
            return Err(EngineError::SessionClosed);
        }
        let question = self.question_by_id(question_id).ok_or_else(|| {
            EngineError::InvalidSelection {
                question_id: question_id.to_string(),
                option_label: Some(option_label.to_string()),
            }
        })?;
        if !question.options.iter().any(|o| o.label == option_label) {
            return Err(EngineError::InvalidSelection {
                question_id: question_id.to_string(),
                option_label: Some(option_label.to_string()),
            });
        }
        self.answers
            .insert(question_id.to_string(), option_label.to_string());
        Ok(())
    }

    /// Selects the option after the currently selected one, wrapping to the
    /// first option; selects the first option when none is selected yet.
    /// Returns the newly selected label.
    pub fn cycle_answer(&mut self, question_id: &str) -> Result<String, EngineError> {
        if self.phase != Phase::Running {
            return Err(EngineError::SessionClosed);
        }
        let question = self.question_by_id(question_id).ok_or_else(|| {
            EngineError::InvalidSelection {
                question_id: question_id.to_string(),
                option_label: None,
            }
        })?;
        let next_index = match self.answers.get(question_id) {
            Some(current) => question
                .options
                .iter()
                .position(|o| &o.label == current)
                .map(|i| (i + 1) % question.options.len())
                .unwrap_or(0),
            None => 0,
        };
        let label = question.options[next_index].label.clone();
        self.answers.insert(question_id.to_string(), label.clone());
        Ok(label)
    }

    /// Moves the current question pointer one step, clamped to the question
    /// range. Moving past either end is a no-op, not an error. Returns the
    /// resulting index.
    pub fn navigate(&mut self, direction: NavDirection) -> Result<usize, EngineError> {
        if self.phase == Phase::Submitted {
            return Err(EngineError::SessionClosed);
        }
        match direction {
            NavDirection::Previous => {
                self.current_index = self.current_index.saturating_sub(1);
            }
            NavDirection::Next => {
                if self.current_index + 1 < self.questions.len() {
                    self.current_index += 1;
                }
            }
        }
        Ok(self.current_index)
    }

    /// Jumps straight to a question, clamped to the last index.
    pub fn go_to(&mut self, index: usize) -> Result<usize, EngineError> {
        if self.phase == Phase::Submitted {
            return Err(EngineError::SessionClosed);
        }
        self.current_index = index.min(self.questions.len() - 1);
        Ok(self.current_index)
    }

    /// Advances the countdown by one second. The countdown keeps running
    /// while the confirmation dialog is open; reaching zero performs the
    /// one automatic submission. Ticks delivered after submission are
    /// no-ops, which makes a late timer racing a manual submit harmless.
    pub fn tick(&mut self) -> TickOutcome {
        if self.phase == Phase::Submitted {
            return TickOutcome::Closed;
        }
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            let payload = self.seal(SubmitTrigger::TimeExpired);
            TickOutcome::Expired(payload)
        } else {
            TickOutcome::Running {
                remaining_seconds: self.remaining_seconds,
            }
        }
    }

    /// Opens the submission confirmation gate. Idempotent while the dialog
    /// is already open.
    pub fn request_submit(&mut self) -> Result<(), EngineError> {
        match self.phase {
            Phase::Running | Phase::ConfirmingSubmit => {
                self.phase = Phase::ConfirmingSubmit;
                Ok(())
            }
            Phase::Submitted => Err(EngineError::SessionClosed),
        }
    }

    /// Cancels the confirmation gate and returns to `Running`. A no-op in
    /// any other phase.
    pub fn cancel_submit(&mut self) {
        if self.phase == Phase::ConfirmingSubmit {
            self.phase = Phase::Running;
        }
    }

    /// Freezes the answers into the final payload and transitions to the
    /// terminal `Submitted` phase. Calling again after submission returns
    /// the already-produced payload with `first == false`, guarding against
    /// double-submit from a user double-click or a timer race.
    pub fn confirm_submit(&mut self) -> SubmitOutcome {
        if let Some(payload) = &self.submitted {
            return SubmitOutcome {
                payload: payload.clone(),
                first: false,
            };
        }
        let payload = self.seal(SubmitTrigger::Manual);
        SubmitOutcome {
            payload,
            first: true,
        }
    }

    fn seal(&mut self, trigger: SubmitTrigger) -> SubmissionPayload {
        let payload = SubmissionPayload {
            trigger,
            answers: self
                .questions
                .iter()
                .map(|q| SubmittedAnswer {
                    question_id: q.id.clone(),
                    selected_option: self.answers.get(&q.id).cloned(),
                })
                .collect(),
        };
        self.phase = Phase::Submitted;
        self.submitted = Some(payload.clone());
        payload
    }

    fn question_by_id(&self, question_id: &str) -> Option<&ExamQuestion> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn questions(&self) -> &[ExamQuestion] {
        &self.questions
    }

    pub fn duration_seconds(&self) -> u32 {
        self.duration_seconds
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    pub fn is_fully_answered(&self) -> bool {
        self.answers.len() == self.questions.len()
    }

    pub fn is_answered(&self, question_id: &str) -> bool {
        self.answers.contains_key(question_id)
    }

    pub fn selected_option(&self, question_id: &str) -> Option<&str> {
        self.answers.get(question_id).map(String::as_str)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            phase: self.phase,
            current_index: self.current_index,
            question_count: self.questions.len(),
            answered_count: self.answers.len(),
            fully_answered: self.is_fully_answered(),
            remaining_seconds: self.remaining_seconds,
            remaining_clock: format_clock(self.remaining_seconds),
            questions: self
                .questions
                .iter()
                .map(|q| QuestionProgress {
                    question_id: q.id.clone(),
                    answered: self.answers.contains_key(&q.id),
                    selected_option: self.answers.get(&q.id).cloned(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(label: &str) -> AnswerOption {
        AnswerOption {
            label: label.to_string(),
            content: format!("option {label}"),
        }
    }

    fn question(id: &str, labels: &[&str]) -> ExamQuestion {
        ExamQuestion {
            id: id.to_string(),
            stem: format!("question {id}"),
            difficulty: None,
            options: labels.iter().map(|l| option(l)).collect(),
        }
    }

    fn config(duration_seconds: u32) -> SessionConfig {
        SessionConfig {
            questions: vec![
                question("q1", &["A", "B"]),
                question("q2", &["A", "B", "C"]),
            ],
            duration_seconds,
        }
    }

    #[test]
    fn rejects_empty_question_list() {
        let cfg = SessionConfig {
            questions: vec![],
            duration_seconds: 60,
        };
        assert!(matches!(
            ExamEngine::new(cfg),
            Err(EngineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_zero_duration() {
        let cfg = SessionConfig {
            questions: vec![question("q1", &["A"])],
            duration_seconds: 0,
        };
        assert!(matches!(
            ExamEngine::new(cfg),
            Err(EngineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_duplicate_option_labels() {
        let cfg = SessionConfig {
            questions: vec![question("q1", &["A", "A"])],
            duration_seconds: 60,
        };
        assert!(matches!(
            ExamEngine::new(cfg),
            Err(EngineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn last_selection_wins() {
        let mut engine = ExamEngine::new(config(60)).unwrap();
        engine.select_answer("q1", "A").unwrap();
        engine.select_answer("q1", "B").unwrap();
        assert_eq!(engine.selected_option("q1"), Some("B"));
        assert_eq!(engine.answered_count(), 1);
    }

    #[test]
    fn unknown_question_or_label_leaves_answers_unchanged() {
        let mut engine = ExamEngine::new(config(60)).unwrap();
        assert!(matches!(
            engine.select_answer("nope", "A"),
            Err(EngineError::InvalidSelection { .. })
        ));
        assert!(matches!(
            engine.select_answer("q1", "Z"),
            Err(EngineError::InvalidSelection { .. })
        ));
        assert_eq!(engine.answered_count(), 0);
    }

    #[test]
    fn cycle_wraps_through_options() {
        let mut engine = ExamEngine::new(config(60)).unwrap();
        assert_eq!(engine.cycle_answer("q1").unwrap(), "A");
        assert_eq!(engine.cycle_answer("q1").unwrap(), "B");
        assert_eq!(engine.cycle_answer("q1").unwrap(), "A");
        assert_eq!(engine.answered_count(), 1);
    }

    #[test]
    fn navigation_clamps_to_bounds() {
        let mut engine = ExamEngine::new(config(60)).unwrap();
        assert_eq!(engine.navigate(NavDirection::Previous).unwrap(), 0);
        assert_eq!(engine.navigate(NavDirection::Next).unwrap(), 1);
        assert_eq!(engine.navigate(NavDirection::Next).unwrap(), 1);
        assert_eq!(engine.go_to(99).unwrap(), 1);
        assert_eq!(engine.go_to(0).unwrap(), 0);
    }

    #[test]
    fn selection_rejected_while_confirming() {
        let mut engine = ExamEngine::new(config(60)).unwrap();
        engine.request_submit().unwrap();
        assert_eq!(
            engine.select_answer("q1", "A"),
            Err(EngineError::SessionClosed)
        );
        engine.cancel_submit();
        engine.select_answer("q1", "A").unwrap();
    }

    #[test]
    fn countdown_keeps_running_while_confirming() {
        let mut engine = ExamEngine::new(config(3)).unwrap();
        engine.request_submit().unwrap();
        assert!(matches!(
            engine.tick(),
            TickOutcome::Running {
                remaining_seconds: 2
            }
        ));
    }

    #[test]
    fn timer_expiry_submits_exactly_once() {
        let mut engine = ExamEngine::new(config(2)).unwrap();
        engine.select_answer("q1", "B").unwrap();
        assert!(matches!(engine.tick(), TickOutcome::Running { .. }));
        let payload = match engine.tick() {
            TickOutcome::Expired(payload) => payload,
            other => panic!("expected expiry, got {other:?}"),
        };
        assert_eq!(payload.trigger, SubmitTrigger::TimeExpired);
        assert_eq!(payload.answers.len(), 2);
        assert_eq!(engine.phase(), Phase::Submitted);
        assert!(matches!(engine.tick(), TickOutcome::Closed));
        assert_eq!(engine.remaining_seconds(), 0);
    }

    #[test]
    fn payload_covers_unanswered_questions() {
        let mut engine = ExamEngine::new(config(60)).unwrap();
        engine.select_answer("q1", "A").unwrap();
        let outcome = engine.confirm_submit();
        assert!(outcome.first);
        assert_eq!(outcome.payload.answers.len(), 2);
        assert_eq!(
            outcome.payload.answers[0].selected_option.as_deref(),
            Some("A")
        );
        assert_eq!(outcome.payload.answers[1].selected_option, None);
    }

    #[test]
    fn repeated_confirm_returns_same_payload() {
        let mut engine = ExamEngine::new(config(60)).unwrap();
        engine.select_answer("q2", "C").unwrap();
        let first = engine.confirm_submit();
        let second = engine.confirm_submit();
        assert!(first.first);
        assert!(!second.first);
        assert_eq!(first.payload, second.payload);
    }

    #[test]
    fn submitted_state_is_frozen() {
        let mut engine = ExamEngine::new(config(60)).unwrap();
        engine.select_answer("q1", "A").unwrap();
        engine.confirm_submit();

        assert_eq!(
            engine.select_answer("q1", "B"),
            Err(EngineError::SessionClosed)
        );
        assert_eq!(
            engine.navigate(NavDirection::Next),
            Err(EngineError::SessionClosed)
        );
        assert_eq!(engine.request_submit(), Err(EngineError::SessionClosed));
        engine.cancel_submit();
        assert_eq!(engine.phase(), Phase::Submitted);
        assert_eq!(engine.selected_option("q1"), Some("A"));
    }

    #[test]
    fn snapshot_reflects_progress() {
        let mut engine = ExamEngine::new(config(90)).unwrap();
        engine.select_answer("q2", "B").unwrap();
        engine.navigate(NavDirection::Next).unwrap();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.current_index, 1);
        assert_eq!(snapshot.answered_count, 1);
        assert!(!snapshot.fully_answered);
        assert_eq!(snapshot.remaining_clock, "01:30");
        assert!(!snapshot.questions[0].answered);
        assert!(snapshot.questions[1].answered);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::question::QuestionView;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PracticeMode {
    /// Shuffled flashcards with immediate feedback
    Random,
    /// Timed mock exam, graded at the end
    Mock,
    /// Untimed pass through a topic range in order
    Training,
    /// Mistake-weighted review
    Smart,
    /// Retry of outstanding mistakes only
    Mistakes,
    /// Question set uploaded by the student
    Custom,
    /// Teacher-scheduled graded test (history only)
    Scheduled,
}

impl PracticeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PracticeMode::Random => "random",
            PracticeMode::Mock => "mock",
            PracticeMode::Training => "training",
            PracticeMode::Smart => "smart",
            PracticeMode::Mistakes => "mistakes",
            PracticeMode::Custom => "custom",
            PracticeMode::Scheduled => "scheduled",
        }
    }

    /// Modes that reveal the correct option right after each answer.
    pub fn gives_feedback(&self) -> bool {
        !matches!(self, PracticeMode::Mock | PracticeMode::Scheduled)
    }

    /// Modes in which a correct answer pays a mistake back.
    pub fn clears_mistakes(&self) -> bool {
        matches!(self, PracticeMode::Smart | PracticeMode::Mistakes)
    }

    /// Custom sets are not part of the question bank.
    pub fn tracks_mistakes(&self) -> bool {
        !matches!(self, PracticeMode::Custom)
    }
}

#[derive(Debug, Deserialize)]
pub struct StartPracticeRequest {
    pub mode: PracticeMode,
    pub subject: Option<String>,
    pub from: Option<u32>,
    pub to: Option<u32>,
    pub limit: Option<usize>,
}

/// Student-supplied question set
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CustomSet {
    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: String,

    #[validate(length(min = 1, max = 500, message = "A set needs between 1 and 500 questions"))]
    #[validate(nested)]
    pub questions: Vec<CustomQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_custom_question"))]
pub struct CustomQuestion {
    #[validate(length(min = 1, message = "Question text is required"))]
    pub text: String,

    #[validate(length(min = 2, message = "At least two options are required"))]
    pub options: Vec<String>,

    pub correct_index: usize,

    pub image: Option<String>,
}

fn validate_custom_question(question: &CustomQuestion) -> Result<(), ValidationError> {
    if question.text.trim().is_empty() {
        let mut err = ValidationError::new("text");
        err.message = Some("question text must not be blank".into());
        return Err(err);
    }
    if question.correct_index >= question.options.len() {
        let mut err = ValidationError::new("correct_index");
        err.message = Some("correct_index must point at one of the options".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct PracticeAnswerRequest {
    pub question_index: usize,
    pub option_index: usize,
}

#[derive(Debug, Serialize)]
pub struct PracticeAnswerResponse {
    pub question_index: usize,
    pub accepted: bool,
    /// Present only in feedback modes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_index: Option<usize>,
    pub answered: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct PracticeSessionView {
    pub id: String,
    pub mode: PracticeMode,
    pub title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub remaining_seconds: Option<i64>,
    pub current_index: usize,
    pub answers: Vec<Option<usize>>,
    pub questions: Vec<QuestionView>,
    /// Correct indexes of questions already answered in feedback modes
    pub revealed: Vec<Option<usize>>,
    pub finished: bool,
}

#[derive(Debug, Serialize, Clone)]
pub struct ReviewItem {
    pub question_id: String,
    pub text: String,
    pub options: Vec<String>,
    pub chosen: Option<usize>,
    pub correct_index: usize,
    pub correct: bool,
}

#[derive(Debug, Serialize, Clone)]
pub struct PracticeSummary {
    pub session_id: String,
    pub mode: PracticeMode,
    pub score: u32,
    pub total: u32,
    pub answered: u32,
    pub percentage: f64,
    pub time_spent_seconds: i64,
    pub items: Vec<ReviewItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_as_snake_case() {
        let mode: PracticeMode = serde_json::from_str("\"mistakes\"").unwrap();
        assert_eq!(mode, PracticeMode::Mistakes);
        assert_eq!(serde_json::to_string(&PracticeMode::Mock).unwrap(), "\"mock\"");
    }

    #[test]
    fn only_mock_and_scheduled_hide_feedback() {
        assert!(PracticeMode::Random.gives_feedback());
        assert!(PracticeMode::Custom.gives_feedback());
        assert!(!PracticeMode::Mock.gives_feedback());
        assert!(!PracticeMode::Scheduled.gives_feedback());
    }

    #[test]
    fn custom_set_rejects_bad_correct_index() {
        let set: CustomSet = serde_json::from_value(serde_json::json!({
            "title": "Capitals",
            "questions": [
                { "text": "Capital of France?", "options": ["Paris", "Rome"], "correct_index": 2 }
            ]
        }))
        .unwrap();
        assert!(set.validate().is_err());
    }
}

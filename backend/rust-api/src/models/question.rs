use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Multiple-choice question stored in the "questions" table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: String,
    pub subject: String,
    pub number: u32,
    pub text: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Question {
    pub fn is_correct(&self, option: usize) -> bool {
        option == self.correct_index
    }

    pub fn view(&self) -> QuestionView {
        QuestionView {
            id: self.id.clone(),
            subject: self.subject.clone(),
            number: self.number,
            text: self.text.clone(),
            options: self.options.clone(),
            image: self.image.clone(),
        }
    }
}

/// Question as shown while it can still be answered (no correct index)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: String,
    pub subject: String,
    pub number: u32,
    pub text: String,
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Body for creating or replacing a question
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_question"))]
pub struct QuestionInput {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Subject must be between 1 and 100 characters"
    ))]
    pub subject: String,

    pub number: u32,

    #[validate(length(min = 1, message = "Question text is required"))]
    pub text: String,

    #[validate(length(min = 2, message = "At least two options are required"))]
    pub options: Vec<String>,

    pub correct_index: usize,

    pub image: Option<String>,

    #[serde(default = "default_active")]
    pub active: bool,
}

fn validate_question(input: &QuestionInput) -> Result<(), ValidationError> {
    if input.subject.trim().is_empty() {
        let mut err = ValidationError::new("subject");
        err.message = Some("subject must not be blank".into());
        return Err(err);
    }
    if input.text.trim().is_empty() {
        let mut err = ValidationError::new("text");
        err.message = Some("question text must not be blank".into());
        return Err(err);
    }
    if input.correct_index >= input.options.len() {
        let mut err = ValidationError::new("correct_index");
        err.message = Some("correct_index must point at one of the options".into());
        return Err(err);
    }
    if input.options.iter().any(|option| option.trim().is_empty()) {
        let mut err = ValidationError::new("options");
        err.message = Some("options must not be blank".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ListQuestionsQuery {
    pub subject: Option<String>,
    pub from: Option<u32>,
    pub to: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SubjectSummary {
    pub subject: String,
    pub question_count: usize,
    pub first_number: u32,
    pub last_number: u32,
}

#[derive(Debug, Serialize, Default)]
pub struct ImportReport {
    pub inserted: usize,
    pub updated: usize,
    pub errors: Vec<ImportRowError>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ImportRowError {
    pub line: u64,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(options: &[&str], correct_index: usize) -> QuestionInput {
        QuestionInput {
            subject: "math".to_string(),
            number: 1,
            text: "2 + 2?".to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
            correct_index,
            image: None,
            active: true,
        }
    }

    #[test]
    fn accepts_valid_question() {
        assert!(input(&["3", "4", "5", "6"], 1).validate().is_ok());
    }

    #[test]
    fn rejects_single_option() {
        assert!(input(&["4"], 0).validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_correct_index() {
        assert!(input(&["3", "4"], 2).validate().is_err());
    }

    #[test]
    fn rejects_blank_option() {
        assert!(input(&["3", " "], 0).validate().is_err());
    }

    #[test]
    fn rejects_whitespace_subject_and_text() {
        let mut blank_subject = input(&["3", "4"], 1);
        blank_subject.subject = "   ".to_string();
        assert!(blank_subject.validate().is_err());

        let mut blank_text = input(&["3", "4"], 1);
        blank_text.text = "\t ".to_string();
        assert!(blank_text.validate().is_err());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::question::QuestionView;

/// Teacher-authored graded test stored in "scheduled_tests"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTest {
    pub id: String,
    pub title: String,
    pub subject: String,
    pub number_from: u32,
    pub number_to: u32,
    pub question_count: usize,
    pub time_limit_minutes: u32,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    #[serde(default)]
    pub class_name: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WindowState {
    Upcoming,
    Open,
    Closed,
}

impl ScheduledTest {
    pub fn window_state(&self, now: DateTime<Utc>) -> WindowState {
        if now < self.opens_at {
            WindowState::Upcoming
        } else if now < self.closes_at {
            WindowState::Open
        } else {
            WindowState::Closed
        }
    }

    /// Tests without a class are visible to everybody.
    pub fn is_visible_to(&self, class_name: Option<&str>) -> bool {
        match (&self.class_name, class_name) {
            (None, _) => true,
            (Some(audience), Some(class)) => audience.eq_ignore_ascii_case(class),
            (Some(_), None) => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_schedule"))]
pub struct ScheduledTestInput {
    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: String,

    #[validate(length(min = 1, message = "Subject is required"))]
    pub subject: String,

    pub number_from: u32,
    pub number_to: u32,

    #[validate(range(min = 1, message = "question_count must be at least 1"))]
    pub question_count: usize,

    #[validate(range(min = 1, message = "time_limit_minutes must be at least 1"))]
    pub time_limit_minutes: u32,

    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub class_name: Option<String>,
}

fn validate_schedule(input: &ScheduledTestInput) -> Result<(), ValidationError> {
    if input.title.trim().is_empty() || input.subject.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("title and subject must not be blank".into());
        return Err(err);
    }
    if input.opens_at >= input.closes_at {
        let mut err = ValidationError::new("window");
        err.message = Some("opens_at must be before closes_at".into());
        return Err(err);
    }
    if input.number_from > input.number_to {
        let mut err = ValidationError::new("range");
        err.message = Some("number_from must not exceed number_to".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Running,
    Completed,
}

/// One student's attempt at a scheduled test, stored in "test_results"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    pub test_id: String,
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub class_name: Option<String>,
    pub question_ids: Vec<String>,
    pub answers: Vec<Option<usize>>,
    #[serde(default)]
    pub score: Option<u32>,
    pub total: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_spent_seconds: Option<i64>,
    pub status: TestStatus,
}

/// Columns rewritten when an attempt is graded
#[derive(Debug, Serialize)]
pub struct CompletedAttemptPatch {
    pub answers: Vec<Option<usize>>,
    pub score: u32,
    pub finished_at: DateTime<Utc>,
    pub time_spent_seconds: i64,
    pub status: TestStatus,
}

#[derive(Debug, Serialize)]
pub struct AvailableTest {
    pub id: String,
    pub title: String,
    pub subject: String,
    pub question_count: usize,
    pub time_limit_minutes: u32,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub window: WindowState,
    pub attempt_id: Option<String>,
    pub attempt_status: Option<TestStatus>,
    pub score: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct AttemptView {
    pub id: String,
    pub test_id: String,
    pub title: String,
    pub status: TestStatus,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub remaining_seconds: i64,
    pub answers: Vec<Option<usize>>,
    pub questions: Vec<QuestionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<AttemptReview>,
}

#[derive(Debug, Serialize)]
pub struct AttemptReview {
    pub score: u32,
    pub total: u32,
    pub time_spent_seconds: i64,
    pub finished_at: Option<DateTime<Utc>>,
    pub correct_indexes: Vec<Option<usize>>,
}

#[derive(Debug, Deserialize)]
pub struct SaveAnswerRequest {
    pub question_index: usize,
    pub option_index: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SaveAnswerResponse {
    pub saved: bool,
    pub remaining_seconds: i64,
    pub answered: usize,
}

#[derive(Debug, Serialize)]
pub struct TestResultRow {
    pub result_id: String,
    pub user_id: String,
    pub username: String,
    pub class_name: Option<String>,
    pub status: TestStatus,
    pub score: Option<u32>,
    pub total: u32,
    pub percentage: Option<f64>,
    pub time_spent_seconds: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&TestResult> for TestResultRow {
    fn from(result: &TestResult) -> Self {
        TestResultRow {
            result_id: result.id.clone(),
            user_id: result.user_id.clone(),
            username: result.username.clone(),
            class_name: result.class_name.clone(),
            status: result.status,
            score: result.score,
            total: result.total,
            percentage: result
                .score
                .map(|score| super::percentage(score as usize, result.total as usize)),
            time_spent_seconds: result.time_spent_seconds,
            started_at: result.started_at,
            finished_at: result.finished_at,
        }
    }
}

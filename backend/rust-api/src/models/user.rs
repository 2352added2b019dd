use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::practice::PracticeMode;

/// Profile row stored in the "profiles" table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub class_name: Option<String>,
    /// question id -> number of outstanding mistakes
    #[serde(default)]
    pub mistakes: BTreeMap<String, u32>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub total_time_seconds: i64,
    #[serde(default)]
    pub total_questions: u64,
    /// Finished sessions over the account's lifetime; history is capped.
    #[serde(default)]
    pub total_sessions: u64,
    /// Token of the most recent login; older tokens are rejected.
    #[serde(default)]
    pub active_session: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Rows written before the counter existed fall back to their history length.
    pub fn session_count(&self) -> usize {
        (self.total_sessions as usize).max(self.history.len())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Student,
    Teacher,
}

impl UserRole {
    pub fn as_str(&self) -> &str {
        match self {
            UserRole::Student => "student",
            UserRole::Teacher => "teacher",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub mode: PracticeMode,
    pub score: u32,
    pub total: u32,
    pub time_spent_seconds: i64,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl HistoryEntry {
    pub fn percentage(&self) -> f64 {
        super::percentage(self.score as usize, self.total as usize)
    }
}

/// Profile returned to clients (no hash, no session token)
#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub id: String,
    pub username: String,
    pub role: UserRole,
    pub class_name: Option<String>,
    pub total_time_seconds: i64,
    pub total_questions: u64,
    pub mistakes_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&UserProfile> for ProfileView {
    fn from(profile: &UserProfile) -> Self {
        ProfileView {
            id: profile.id.clone(),
            username: profile.username.clone(),
            role: profile.role.clone(),
            class_name: profile.class_name.clone(),
            total_time_seconds: profile.total_time_seconds,
            total_questions: profile.total_questions,
            mistakes_count: profile.mistakes.len(),
            created_at: profile.created_at,
            last_login_at: profile.last_login_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 32, message = "Username must be between 3 and 32 characters"))]
    pub username: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[validate(length(max = 32, message = "Class name must be at most 32 characters"))]
    pub class_name: Option<String>,

    /// Required to register a teacher account
    pub teacher_code: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,

    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub user: ProfileView,
}

#[derive(Debug, Serialize)]
pub struct MistakeItem {
    pub question_id: String,
    pub count: u32,
    pub subject: Option<String>,
    pub number: Option<u32>,
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Default)]
pub struct ModeStats {
    pub sessions: usize,
    pub average_percentage: f64,
}

#[derive(Debug, Serialize)]
pub struct UserStats {
    pub username: String,
    pub class_name: Option<String>,
    pub total_questions: u64,
    pub total_time_seconds: i64,
    pub sessions: usize,
    pub average_percentage: f64,
    pub by_mode: BTreeMap<String, ModeStats>,
    pub mistakes_count: usize,
    pub top_mistakes: Vec<MistakeItem>,
    pub recent: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct StudentSummary {
    pub user_id: String,
    pub username: String,
    pub class_name: Option<String>,
    pub sessions: usize,
    pub total_questions: u64,
    pub total_time_seconds: i64,
    pub average_percentage: Option<f64>,
    pub mistakes_count: usize,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct StudentsQuery {
    #[serde(rename = "class")]
    pub class_name: Option<String>,
}

use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::exam::{ScheduledTestInput, TestResultRow};
use crate::models::user::StudentSummary;
use crate::models::{ScheduledTest, TestResult, UserProfile, UserRole};
use crate::store::{self, Query, SharedStore, PROFILES, SCHEDULED_TESTS, TEST_RESULTS};

use super::profile_service::average_percentage;

/// Teacher-side management of scheduled tests and their results.
pub struct ScheduleService {
    store: SharedStore,
    page_size: usize,
}

impl ScheduleService {
    pub fn new(store: SharedStore, page_size: usize) -> Self {
        Self { store, page_size }
    }

    pub async fn list(&self) -> AppResult<Vec<ScheduledTest>> {
        Ok(store::select_as(
            self.store.as_ref(),
            SCHEDULED_TESTS,
            &Query::new().order_by("opens_at", false),
        )
        .await?)
    }

    pub async fn get(&self, test_id: &str) -> AppResult<ScheduledTest> {
        store::find_one(self.store.as_ref(), SCHEDULED_TESTS, &Query::by_id(test_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Test {} not found", test_id)))
    }

    pub async fn create(
        &self,
        teacher_id: &str,
        input: ScheduledTestInput,
    ) -> AppResult<ScheduledTest> {
        input.validate()?;
        let test = ScheduledTest {
            id: Uuid::new_v4().to_string(),
            title: input.title.trim().to_string(),
            subject: input.subject.trim().to_string(),
            number_from: input.number_from,
            number_to: input.number_to,
            question_count: input.question_count,
            time_limit_minutes: input.time_limit_minutes,
            opens_at: input.opens_at,
            closes_at: input.closes_at,
            class_name: normalize_class(input.class_name),
            created_by: teacher_id.to_string(),
            created_at: Utc::now(),
        };
        let stored = store::insert_as(self.store.as_ref(), SCHEDULED_TESTS, &test).await?;
        tracing::info!(
            "Scheduled test {} created by {}: {} ({} - {})",
            stored.id,
            teacher_id,
            stored.title,
            stored.opens_at,
            stored.closes_at
        );
        Ok(stored)
    }

    /// Replaces the editable fields. Running attempts keep their questions.
    pub async fn update(
        &self,
        test_id: &str,
        input: ScheduledTestInput,
    ) -> AppResult<ScheduledTest> {
        input.validate()?;
        let mut test = self.get(test_id).await?;
        test.title = input.title.trim().to_string();
        test.subject = input.subject.trim().to_string();
        test.number_from = input.number_from;
        test.number_to = input.number_to;
        test.question_count = input.question_count;
        test.time_limit_minutes = input.time_limit_minutes;
        test.opens_at = input.opens_at;
        test.closes_at = input.closes_at;
        test.class_name = normalize_class(input.class_name);

        store::update_by_id(self.store.as_ref(), SCHEDULED_TESTS, test_id, &test).await?;
        tracing::info!("Scheduled test {} updated", test_id);
        Ok(test)
    }

    /// Deletes the test together with its attempts.
    pub async fn delete(&self, test_id: &str) -> AppResult<()> {
        let removed = store::delete_by_id(self.store.as_ref(), SCHEDULED_TESTS, test_id).await?;
        if removed == 0 {
            return Err(AppError::NotFound(format!("Test {} not found", test_id)));
        }
        let attempts = self
            .store
            .delete(TEST_RESULTS, &Query::new().eq("test_id", test_id))
            .await?;
        tracing::info!("Scheduled test {} deleted with {} attempts", test_id, attempts);
        Ok(())
    }

    pub async fn results(&self, test_id: &str) -> AppResult<Vec<TestResultRow>> {
        self.get(test_id).await?;
        let mut results: Vec<TestResult> = store::select_as(
            self.store.as_ref(),
            TEST_RESULTS,
            &Query::new().eq("test_id", test_id),
        )
        .await?;
        results.sort_by(|a, b| {
            a.username
                .to_lowercase()
                .cmp(&b.username.to_lowercase())
                .then(a.started_at.cmp(&b.started_at))
        });
        Ok(results.iter().map(TestResultRow::from).collect())
    }

    /// Removes one attempt so the student can take the test again.
    pub async fn reset_attempt(&self, test_id: &str, result_id: &str) -> AppResult<()> {
        let removed = self
            .store
            .delete(
                TEST_RESULTS,
                &Query::by_id(result_id).eq("test_id", test_id),
            )
            .await?;
        if removed == 0 {
            return Err(AppError::NotFound(format!(
                "Attempt {} not found for test {}",
                result_id, test_id
            )));
        }
        tracing::info!("Attempt {} of test {} reset", result_id, test_id);
        Ok(())
    }

    pub async fn students(&self, class_name: Option<&str>) -> AppResult<Vec<StudentSummary>> {
        let profiles = store::fetch_all(
            self.store.as_ref(),
            PROFILES,
            &Query::new().eq("role", UserRole::Student.as_str()),
            self.page_size,
        )
        .await?;

        let mut summaries = Vec::with_capacity(profiles.len());
        for row in profiles {
            let profile: UserProfile = match serde_json::from_value(row) {
                Ok(profile) => profile,
                Err(e) => {
                    tracing::warn!("Skipping malformed profile row: {}", e);
                    continue;
                }
            };
            if let Some(class) = class_name {
                let same_class = profile
                    .class_name
                    .as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case(class));
                if !same_class {
                    continue;
                }
            }
            summaries.push(StudentSummary {
                sessions: profile.session_count(),
                total_questions: profile.total_questions,
                total_time_seconds: profile.total_time_seconds,
                average_percentage: average_percentage(&profile.history),
                mistakes_count: profile.mistakes.len(),
                last_login_at: profile.last_login_at,
                user_id: profile.id,
                username: profile.username,
                class_name: profile.class_name,
            });
        }
        summaries.sort_by(|a, b| {
            a.class_name
                .cmp(&b.class_name)
                .then_with(|| a.username.to_lowercase().cmp(&b.username.to_lowercase()))
        });
        Ok(summaries)
    }
}

fn normalize_class(class_name: Option<String>) -> Option<String> {
    class_name
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

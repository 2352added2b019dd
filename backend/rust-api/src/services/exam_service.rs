use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics::EXAM_ATTEMPTS_TOTAL;
use crate::models::exam::{
    AttemptReview, AttemptView, AvailableTest, CompletedAttemptPatch, SaveAnswerRequest,
    SaveAnswerResponse, WindowState,
};
use crate::models::question::QuestionView;
use crate::models::{HistoryEntry, PracticeMode, Question, ScheduledTest, TestResult, TestStatus};
use crate::store::{self, Query, SharedStore, SCHEDULED_TESTS, TEST_RESULTS};
use crate::utils::time::{attempt_deadline, elapsed_seconds, remaining_seconds};

use super::profile_service::{Outcome, ProfileService};
use super::question_bank::QuestionBank;
use super::selection;

/// Wall-clock state of a running attempt, used by the timer stream.
#[derive(Debug, Clone)]
pub struct AttemptClock {
    pub attempt_id: String,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub status: TestStatus,
}

pub struct ExamService {
    store: SharedStore,
    bank: QuestionBank,
    profiles: ProfileService,
}

impl ExamService {
    pub fn new(store: SharedStore, bank: QuestionBank, profiles: ProfileService) -> Self {
        Self {
            store,
            bank,
            profiles,
        }
    }

    pub async fn list_available(&self, user_id: &str) -> AppResult<Vec<AvailableTest>> {
        let profile = self.profiles.get(user_id).await?;
        let now = Utc::now();

        let tests: Vec<ScheduledTest> = store::select_as(
            self.store.as_ref(),
            SCHEDULED_TESTS,
            &Query::new().order_by("opens_at", true),
        )
        .await?;
        let attempts: Vec<TestResult> = store::select_as(
            self.store.as_ref(),
            TEST_RESULTS,
            &Query::new().eq("user_id", user_id),
        )
        .await?;
        let mut attempts: HashMap<String, TestResult> = attempts
            .into_iter()
            .map(|attempt| (attempt.test_id.clone(), attempt))
            .collect();

        let mut available = Vec::new();
        for test in tests
            .into_iter()
            .filter(|t| t.is_visible_to(profile.class_name.as_deref()))
        {
            let attempt = match attempts.remove(&test.id) {
                Some(attempt) => Some(self.settle(attempt, &test, now).await?),
                None => None,
            };
            available.push(AvailableTest {
                window: test.window_state(now),
                attempt_id: attempt.as_ref().map(|a| a.id.clone()),
                attempt_status: attempt.as_ref().map(|a| a.status),
                score: attempt.as_ref().and_then(|a| a.score),
                id: test.id,
                title: test.title,
                subject: test.subject,
                question_count: test.question_count,
                time_limit_minutes: test.time_limit_minutes,
                opens_at: test.opens_at,
                closes_at: test.closes_at,
            });
        }
        Ok(available)
    }

    /// Resumes the caller's running attempt or opens a new one.
    pub async fn start_or_resume(&self, user_id: &str, test_id: &str) -> AppResult<AttemptView> {
        let profile = self.profiles.get(user_id).await?;
        let test = self.test(test_id).await?;
        if !test.is_visible_to(profile.class_name.as_deref()) {
            return Err(AppError::Forbidden(
                "This test is not assigned to your class".to_string(),
            ));
        }
        let now = Utc::now();

        let existing: Option<TestResult> = store::find_one(
            self.store.as_ref(),
            TEST_RESULTS,
            &Query::new().eq("test_id", test_id).eq("user_id", user_id),
        )
        .await?;
        if let Some(attempt) = existing {
            if attempt.status == TestStatus::Completed {
                return Err(AppError::Conflict(
                    "You have already completed this test".to_string(),
                ));
            }
            let attempt = self.settle(attempt, &test, now).await?;
            if attempt.status == TestStatus::Completed {
                return Err(AppError::Expired(
                    "Time is up: your attempt was submitted automatically".to_string(),
                ));
            }
            tracing::info!("Resuming attempt {} of test {} for {}", attempt.id, test_id, user_id);
            EXAM_ATTEMPTS_TOTAL.with_label_values(&["resumed"]).inc();
            return self.render(&attempt, &test, now).await;
        }

        match test.window_state(now) {
            WindowState::Upcoming => {
                return Err(AppError::BadRequest(format!(
                    "This test opens at {}",
                    test.opens_at.to_rfc3339()
                )))
            }
            WindowState::Closed => {
                return Err(AppError::Expired("This test has closed".to_string()))
            }
            WindowState::Open => {}
        }

        let pool = self
            .bank
            .list(Some(&test.subject), Some(test.number_from), Some(test.number_to))
            .await?;
        let question_ids: Vec<String> = {
            let mut rng = rand::rng();
            selection::for_scheduled_test(&pool, &test, &mut rng)
                .into_iter()
                .map(|q| q.id)
                .collect()
        };
        if question_ids.is_empty() {
            return Err(AppError::BadRequest(
                "No questions are available for this test's topic".to_string(),
            ));
        }

        let attempt = TestResult {
            id: Uuid::new_v4().to_string(),
            test_id: test.id.clone(),
            user_id: profile.id.clone(),
            username: profile.username.clone(),
            class_name: profile.class_name.clone(),
            answers: vec![None; question_ids.len()],
            total: question_ids.len() as u32,
            question_ids,
            score: None,
            started_at: now,
            finished_at: None,
            time_spent_seconds: None,
            status: TestStatus::Running,
        };
        let attempt = store::insert_as(self.store.as_ref(), TEST_RESULTS, &attempt).await?;

        tracing::info!(
            "Attempt {} started on test {} by {} ({} questions)",
            attempt.id,
            test.id,
            profile.username,
            attempt.total
        );
        EXAM_ATTEMPTS_TOTAL.with_label_values(&["started"]).inc();
        self.render(&attempt, &test, now).await
    }

    /// Owners see their attempt; teachers see any.
    pub async fn get_attempt(
        &self,
        user_id: &str,
        is_teacher: bool,
        attempt_id: &str,
    ) -> AppResult<AttemptView> {
        let attempt = self.attempt(attempt_id).await?;
        if attempt.user_id != user_id && !is_teacher {
            return Err(AppError::Forbidden(
                "This attempt belongs to another user".to_string(),
            ));
        }
        let test = self.test(&attempt.test_id).await?;
        let now = Utc::now();
        let attempt = self.settle(attempt, &test, now).await?;
        self.render(&attempt, &test, now).await
    }

    pub async fn save_answer(
        &self,
        user_id: &str,
        attempt_id: &str,
        req: SaveAnswerRequest,
    ) -> AppResult<SaveAnswerResponse> {
        let (mut attempt, test) = self.owned_running(user_id, attempt_id).await?;
        let now = Utc::now();
        let deadline = deadline_of(&attempt, &test);

        if now >= deadline {
            self.complete(attempt, &test, now, "auto_submitted").await?;
            return Err(AppError::Expired(
                "Time is up: your attempt was submitted automatically".to_string(),
            ));
        }

        let question_id = attempt.question_ids.get(req.question_index).ok_or_else(|| {
            AppError::BadRequest(format!("Question index {} is out of range", req.question_index))
        })?;
        if let Some(option) = req.option_index {
            let question = self.bank.get(question_id).await?;
            if option >= question.options.len() {
                return Err(AppError::BadRequest(format!("Option {} does not exist", option)));
            }
        }

        attempt.answers[req.question_index] = req.option_index;
        let saved = store::update_where(
            self.store.as_ref(),
            TEST_RESULTS,
            &running(&attempt.id),
            &json!({ "answers": attempt.answers }),
        )
        .await?;
        if saved == 0 {
            return Err(AppError::Conflict(
                "This attempt has already been submitted".to_string(),
            ));
        }

        tracing::debug!(
            "Attempt {}: answer {} saved as {:?}",
            attempt.id,
            req.question_index,
            req.option_index
        );
        Ok(SaveAnswerResponse {
            saved: true,
            remaining_seconds: remaining_seconds(deadline, now),
            answered: attempt.answers.iter().filter(|a| a.is_some()).count(),
        })
    }

    pub async fn submit(&self, user_id: &str, attempt_id: &str) -> AppResult<AttemptView> {
        let (attempt, test) = self.owned_running(user_id, attempt_id).await?;
        let now = Utc::now();
        let completed = self.complete(attempt, &test, now, "submitted").await?;
        self.render(&completed, &test, now).await
    }

    pub async fn clock(&self, user_id: &str, attempt_id: &str) -> AppResult<AttemptClock> {
        let attempt = self.attempt(attempt_id).await?;
        if attempt.user_id != user_id {
            return Err(AppError::Forbidden(
                "This attempt belongs to another user".to_string(),
            ));
        }
        let test = self.test(&attempt.test_id).await?;
        Ok(AttemptClock {
            deadline: deadline_of(&attempt, &test),
            attempt_id: attempt.id,
            started_at: attempt.started_at,
            status: attempt.status,
        })
    }

    /// Current status as stored, without any ownership check.
    pub async fn status(&self, attempt_id: &str) -> AppResult<TestStatus> {
        Ok(self.attempt(attempt_id).await?.status)
    }

    /// Submits a running attempt whose deadline has passed; otherwise a no-op.
    pub async fn expire_if_due(&self, attempt_id: &str) -> AppResult<TestStatus> {
        let attempt = self.attempt(attempt_id).await?;
        let test = self.test(&attempt.test_id).await?;
        Ok(self.settle(attempt, &test, Utc::now()).await?.status)
    }

    async fn owned_running(
        &self,
        user_id: &str,
        attempt_id: &str,
    ) -> AppResult<(TestResult, ScheduledTest)> {
        let attempt = self.attempt(attempt_id).await?;
        if attempt.user_id != user_id {
            return Err(AppError::Forbidden(
                "This attempt belongs to another user".to_string(),
            ));
        }
        if attempt.status == TestStatus::Completed {
            return Err(AppError::Conflict(
                "This attempt has already been submitted".to_string(),
            ));
        }
        let test = self.test(&attempt.test_id).await?;
        Ok((attempt, test))
    }

    async fn settle(
        &self,
        attempt: TestResult,
        test: &ScheduledTest,
        now: DateTime<Utc>,
    ) -> AppResult<TestResult> {
        let deadline = deadline_of(&attempt, test);
        if attempt.status == TestStatus::Running && now >= deadline {
            tracing::info!("Attempt {} passed its deadline, submitting", attempt.id);
            return self.complete(attempt, test, now, "auto_submitted").await;
        }
        Ok(attempt)
    }

    /// Grades the attempt, writes it back and records the outcome on the profile.
    /// Only the caller whose write flips the row from running records the outcome.
    async fn complete(
        &self,
        mut attempt: TestResult,
        test: &ScheduledTest,
        now: DateTime<Utc>,
        event: &str,
    ) -> AppResult<TestResult> {
        let deadline = deadline_of(&attempt, test);
        let questions = self.aligned_questions(&attempt.question_ids).await?;

        let mut score = 0u32;
        let mut mistake_deltas = Vec::new();
        for (question, answer) in questions.iter().zip(&attempt.answers) {
            match (question, answer) {
                (Some(q), Some(chosen)) if q.is_correct(*chosen) => score += 1,
                (Some(q), Some(_)) => mistake_deltas.push((q.id.clone(), 1)),
                _ => {}
            }
        }
        let time_spent = elapsed_seconds(attempt.started_at, now, Some(deadline));
        let finished_at = now.min(deadline);

        let patch = CompletedAttemptPatch {
            answers: attempt.answers.clone(),
            score,
            finished_at,
            time_spent_seconds: time_spent,
            status: TestStatus::Completed,
        };
        let claimed =
            store::update_where(self.store.as_ref(), TEST_RESULTS, &running(&attempt.id), &patch)
                .await?;
        if claimed == 0 {
            tracing::debug!("Attempt {} was already completed, keeping stored result", attempt.id);
            return self.attempt(&attempt.id).await;
        }

        attempt.score = Some(score);
        attempt.finished_at = Some(finished_at);
        attempt.time_spent_seconds = Some(time_spent);
        attempt.status = TestStatus::Completed;

        let answered = attempt.answers.iter().filter(|a| a.is_some()).count() as u64;
        self.profiles
            .record_outcome(
                &attempt.user_id,
                Outcome {
                    entry: HistoryEntry {
                        mode: PracticeMode::Scheduled,
                        score,
                        total: attempt.total,
                        time_spent_seconds: time_spent,
                        finished_at,
                        test_id: Some(test.id.clone()),
                        title: Some(test.title.clone()),
                    },
                    answered,
                    mistake_deltas,
                },
            )
            .await?;

        EXAM_ATTEMPTS_TOTAL.with_label_values(&[event]).inc();
        tracing::info!(
            "Attempt {} {}: {}/{} in {}s",
            attempt.id,
            event,
            score,
            attempt.total,
            time_spent
        );
        Ok(attempt)
    }

    async fn render(
        &self,
        attempt: &TestResult,
        test: &ScheduledTest,
        now: DateTime<Utc>,
    ) -> AppResult<AttemptView> {
        let deadline = deadline_of(attempt, test);
        let questions = self.aligned_questions(&attempt.question_ids).await?;

        let views = attempt
            .question_ids
            .iter()
            .zip(&questions)
            .map(|(id, question)| match question {
                Some(q) => q.view(),
                None => QuestionView {
                    id: id.clone(),
                    subject: test.subject.clone(),
                    number: 0,
                    text: "This question is no longer available".to_string(),
                    options: Vec::new(),
                    image: None,
                },
            })
            .collect();

        let review = match attempt.status {
            TestStatus::Running => None,
            TestStatus::Completed => Some(AttemptReview {
                score: attempt.score.unwrap_or(0),
                total: attempt.total,
                time_spent_seconds: attempt.time_spent_seconds.unwrap_or(0),
                finished_at: attempt.finished_at,
                correct_indexes: questions
                    .iter()
                    .map(|q| q.as_ref().map(|q| q.correct_index))
                    .collect(),
            }),
        };

        Ok(AttemptView {
            id: attempt.id.clone(),
            test_id: test.id.clone(),
            title: test.title.clone(),
            status: attempt.status,
            started_at: attempt.started_at,
            deadline,
            remaining_seconds: match attempt.status {
                TestStatus::Running => remaining_seconds(deadline, now),
                TestStatus::Completed => 0,
            },
            answers: attempt.answers.clone(),
            questions: views,
            review,
        })
    }

    async fn aligned_questions(&self, ids: &[String]) -> AppResult<Vec<Option<Question>>> {
        let found: HashMap<String, Question> = self
            .bank
            .get_many(ids)
            .await?
            .into_iter()
            .map(|q| (q.id.clone(), q))
            .collect();
        Ok(ids.iter().map(|id| found.get(id).cloned()).collect())
    }

    async fn attempt(&self, attempt_id: &str) -> AppResult<TestResult> {
        store::find_one(self.store.as_ref(), TEST_RESULTS, &Query::by_id(attempt_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Attempt {} not found", attempt_id)))
    }

    async fn test(&self, test_id: &str) -> AppResult<ScheduledTest> {
        store::find_one(self.store.as_ref(), SCHEDULED_TESTS, &Query::by_id(test_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Test {} not found", test_id)))
    }
}

fn deadline_of(attempt: &TestResult, test: &ScheduledTest) -> DateTime<Utc> {
    attempt_deadline(attempt.started_at, test.time_limit_minutes, Some(test.closes_at))
}

/// Matches the attempt only while it is still running.
fn running(attempt_id: &str) -> Query {
    Query::by_id(attempt_id).eq("status", "running")
}

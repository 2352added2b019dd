use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;
use validator::Validate;

use crate::config::PracticeConfig;
use crate::error::{AppError, AppResult};
use crate::metrics::{ANSWERS_SUBMITTED_TOTAL, PRACTICE_SESSIONS_ACTIVE, PRACTICE_SESSIONS_TOTAL};
use crate::models::practice::{
    CustomSet, PracticeAnswerRequest, PracticeAnswerResponse, PracticeSessionView,
    PracticeSummary, ReviewItem, StartPracticeRequest,
};
use crate::models::{percentage, HistoryEntry, PracticeMode, Question};
use crate::utils::time::{elapsed_seconds, remaining_seconds};

use super::profile_service::{Outcome, ProfileService};
use super::question_bank::QuestionBank;
use super::selection;

#[derive(Debug, Clone)]
pub struct PracticeSession {
    pub id: String,
    pub user_id: String,
    pub mode: PracticeMode,
    pub title: Option<String>,
    pub questions: Vec<Question>,
    pub answers: Vec<Option<usize>>,
    pub started_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    pub summary: Option<PracticeSummary>,
}

impl PracticeSession {
    fn new(
        user_id: &str,
        mode: PracticeMode,
        title: Option<String>,
        questions: Vec<Question>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            mode,
            title,
            answers: vec![None; questions.len()],
            questions,
            started_at: now,
            deadline: None,
            last_activity: now,
            summary: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.summary.is_some()
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    fn answered(&self) -> usize {
        self.answers.iter().filter(|a| a.is_some()).count()
    }

    pub fn view(&self, now: DateTime<Utc>) -> PracticeSessionView {
        let reveal_all = self.is_finished();
        let revealed = self
            .questions
            .iter()
            .zip(&self.answers)
            .map(|(question, answer)| {
                let shown = reveal_all || (self.mode.gives_feedback() && answer.is_some());
                shown.then_some(question.correct_index)
            })
            .collect();

        PracticeSessionView {
            id: self.id.clone(),
            mode: self.mode,
            title: self.title.clone(),
            started_at: self.started_at,
            deadline: self.deadline,
            remaining_seconds: self.deadline.map(|d| remaining_seconds(d, now)),
            current_index: self
                .answers
                .iter()
                .position(Option::is_none)
                .unwrap_or(self.answers.len()),
            answers: self.answers.clone(),
            questions: self.questions.iter().map(Question::view).collect(),
            revealed,
            finished: reveal_all,
        }
    }

    /// Scores the session and builds the review.
    pub fn grade(&self, now: DateTime<Utc>) -> PracticeSummary {
        let items: Vec<ReviewItem> = self
            .questions
            .iter()
            .zip(&self.answers)
            .map(|(question, chosen)| ReviewItem {
                question_id: question.id.clone(),
                text: question.text.clone(),
                options: question.options.clone(),
                chosen: *chosen,
                correct_index: question.correct_index,
                correct: chosen.is_some_and(|c| question.is_correct(c)),
            })
            .collect();

        let score = items.iter().filter(|i| i.correct).count();
        PracticeSummary {
            session_id: self.id.clone(),
            mode: self.mode,
            score: score as u32,
            total: items.len() as u32,
            answered: self.answered() as u32,
            percentage: percentage(score, items.len()),
            time_spent_seconds: elapsed_seconds(self.started_at, now, self.deadline),
            items,
        }
    }

    /// Mistake changes applied when the session closes. Feedback modes
    /// settle mistakes per answer instead.
    fn closing_mistake_deltas(&self, summary: &PracticeSummary) -> Vec<(String, i32)> {
        if self.mode.gives_feedback() || !self.mode.tracks_mistakes() {
            return Vec::new();
        }
        summary
            .items
            .iter()
            .filter(|item| item.chosen.is_some() && !item.correct)
            .map(|item| (item.question_id.clone(), 1))
            .collect()
    }
}

/// In-process registry of running and recently finished practice sessions.
#[derive(Clone, Default)]
pub struct PracticeRegistry {
    sessions: Arc<RwLock<HashMap<String, PracticeSession>>>,
}

impl PracticeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drops sessions idle for longer than `ttl`.
    pub async fn prune(&self, ttl: Duration) -> usize {
        let cutoff = Utc::now() - ttl;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| {
            let keep = session.last_activity > cutoff;
            if !keep && !session.is_finished() {
                PRACTICE_SESSIONS_TOTAL
                    .with_label_values(&[session.mode.as_str(), "abandoned"])
                    .inc();
            }
            keep
        });
        PRACTICE_SESSIONS_ACTIVE.set(sessions.len() as i64);
        before - sessions.len()
    }
}

enum AnswerEffect {
    Saved(PracticeAnswerResponse, Option<(String, i32)>),
    Expired(Outcome),
}

pub struct PracticeService {
    registry: PracticeRegistry,
    bank: QuestionBank,
    profiles: ProfileService,
    config: PracticeConfig,
}

impl PracticeService {
    pub fn new(
        registry: PracticeRegistry,
        bank: QuestionBank,
        profiles: ProfileService,
        config: PracticeConfig,
    ) -> Self {
        Self {
            registry,
            bank,
            profiles,
            config,
        }
    }

    pub async fn start(
        &self,
        user_id: &str,
        req: StartPracticeRequest,
    ) -> AppResult<PracticeSessionView> {
        self.prune().await;

        let pool = self
            .bank
            .list(req.subject.as_deref(), req.from, req.to)
            .await?;
        let mistakes = match req.mode {
            PracticeMode::Smart | PracticeMode::Mistakes => {
                self.profiles.get(user_id).await?.mistakes
            }
            _ => Default::default(),
        };

        let questions = {
            let mut rng = rand::rng();
            match req.mode {
                PracticeMode::Random => selection::shuffled(&pool, req.limit, &mut rng),
                PracticeMode::Mock => {
                    selection::mock_exam(&pool, self.config.mock_question_count, &mut rng)
                }
                PracticeMode::Training => selection::training(&pool, req.limit),
                PracticeMode::Smart => selection::smart(
                    &pool,
                    &mistakes,
                    req.limit.unwrap_or(self.config.smart_session_size),
                    &mut rng,
                ),
                PracticeMode::Mistakes => {
                    let mut picked = selection::mistakes(&pool, &mistakes, &mut rng);
                    if let Some(limit) = req.limit {
                        picked.truncate(limit);
                    }
                    picked
                }
                PracticeMode::Custom => {
                    return Err(AppError::BadRequest(
                        "Custom sets are started from an uploaded question set".to_string(),
                    ))
                }
                PracticeMode::Scheduled => {
                    return Err(AppError::BadRequest(
                        "Scheduled tests are started from the exams list".to_string(),
                    ))
                }
            }
        };

        if questions.is_empty() {
            return Err(AppError::BadRequest(match req.mode {
                PracticeMode::Mistakes => "There are no mistakes to retry".to_string(),
                _ => "No questions match the chosen topic".to_string(),
            }));
        }

        let mut session = PracticeSession::new(user_id, req.mode, None, questions);
        if req.mode == PracticeMode::Mock {
            let limit = Duration::minutes(i64::from(self.config.mock_time_limit_minutes));
            session.deadline = Some(session.started_at + limit);
        }

        Ok(self.register(session).await)
    }

    pub async fn start_custom(
        &self,
        user_id: &str,
        set: CustomSet,
    ) -> AppResult<PracticeSessionView> {
        set.validate()?;
        self.prune().await;

        let now = Utc::now();
        let questions = set
            .questions
            .into_iter()
            .enumerate()
            .map(|(i, q)| Question {
                id: format!("custom-{}", i + 1),
                subject: set.title.clone(),
                number: (i + 1) as u32,
                text: q.text,
                options: q.options,
                correct_index: q.correct_index,
                active: true,
                image: q.image.filter(|i| !i.is_empty()),
                updated_at: now,
            })
            .collect();

        let session =
            PracticeSession::new(user_id, PracticeMode::Custom, Some(set.title), questions);
        Ok(self.register(session).await)
    }

    pub async fn get(&self, user_id: &str, session_id: &str) -> AppResult<PracticeSessionView> {
        let now = Utc::now();
        let (view, outcome) = {
            let mut sessions = self.registry.sessions.write().await;
            let session = owned_session(&mut sessions, user_id, session_id)?;
            let outcome = if !session.is_finished() && session.is_expired(now) {
                Some(close(session, now))
            } else {
                None
            };
            (session.view(now), outcome)
        };

        if let Some(outcome) = outcome {
            tracing::info!("Mock session {} ran out of time on read", session_id);
            self.profiles.record_outcome(user_id, outcome).await?;
        }
        Ok(view)
    }

    pub async fn answer(
        &self,
        user_id: &str,
        session_id: &str,
        req: PracticeAnswerRequest,
    ) -> AppResult<PracticeAnswerResponse> {
        let now = Utc::now();
        let effect = {
            let mut sessions = self.registry.sessions.write().await;
            let session = owned_session(&mut sessions, user_id, session_id)?;
            if session.is_finished() {
                return Err(AppError::Conflict("Session is already finished".to_string()));
            }
            session.last_activity = now;

            let question = session.questions.get(req.question_index).ok_or_else(|| {
                AppError::BadRequest(format!(
                    "Question index {} is out of range",
                    req.question_index
                ))
            })?;
            if req.option_index >= question.options.len() {
                return Err(AppError::BadRequest(format!(
                    "Option {} does not exist",
                    req.option_index
                )));
            }
            let correct = question.is_correct(req.option_index);
            let correct_index = question.correct_index;
            let question_id = question.id.clone();
            ANSWERS_SUBMITTED_TOTAL
                .with_label_values(&[session.mode.as_str(), if correct { "true" } else { "false" }])
                .inc();

            if session.is_expired(now) {
                AnswerEffect::Expired(close(session, now))
            } else if session.mode.gives_feedback() {
                if session.answers[req.question_index].is_some() {
                    return Err(AppError::Conflict(
                        "This question has already been answered".to_string(),
                    ));
                }
                session.answers[req.question_index] = Some(req.option_index);

                let delta = match (session.mode.tracks_mistakes(), correct) {
                    (false, _) => None,
                    (true, false) => Some((question_id, 1)),
                    (true, true) if session.mode.clears_mistakes() => Some((question_id, -1)),
                    (true, true) => None,
                };
                let response = PracticeAnswerResponse {
                    question_index: req.question_index,
                    accepted: true,
                    correct: Some(correct),
                    correct_index: Some(correct_index),
                    answered: session.answered(),
                    total: session.questions.len(),
                };
                AnswerEffect::Saved(response, delta)
            } else {
                session.answers[req.question_index] = Some(req.option_index);
                let response = PracticeAnswerResponse {
                    question_index: req.question_index,
                    accepted: true,
                    correct: None,
                    correct_index: None,
                    answered: session.answered(),
                    total: session.questions.len(),
                };
                AnswerEffect::Saved(response, None)
            }
        };

        match effect {
            AnswerEffect::Expired(outcome) => {
                self.profiles.record_outcome(user_id, outcome).await?;
                Err(AppError::Expired(
                    "Time is up: the session was finished automatically".to_string(),
                ))
            }
            AnswerEffect::Saved(response, delta) => {
                if let Some((question_id, delta)) = delta {
                    self.profiles.adjust_mistake(user_id, &question_id, delta).await?;
                }
                Ok(response)
            }
        }
    }

    pub async fn finish(&self, user_id: &str, session_id: &str) -> AppResult<PracticeSummary> {
        let now = Utc::now();
        let (summary, outcome) = {
            let mut sessions = self.registry.sessions.write().await;
            let session = owned_session(&mut sessions, user_id, session_id)?;
            if session.is_finished() {
                return Err(AppError::Conflict("Session is already finished".to_string()));
            }
            let outcome = close(session, now);
            let summary = session.summary.clone().ok_or_else(|| {
                AppError::Internal("finished session has no summary".to_string())
            })?;
            (summary, outcome)
        };

        self.profiles.record_outcome(user_id, outcome).await?;
        tracing::info!(
            "Practice session {} finished: {}/{} ({})",
            session_id,
            summary.score,
            summary.total,
            summary.mode.as_str()
        );
        Ok(summary)
    }

    async fn register(&self, session: PracticeSession) -> PracticeSessionView {
        let view = session.view(Utc::now());
        tracing::info!(
            "Practice session {} started for user {}: {} with {} questions",
            session.id,
            session.user_id,
            session.mode.as_str(),
            session.questions.len()
        );
        PRACTICE_SESSIONS_TOTAL
            .with_label_values(&[session.mode.as_str(), "started"])
            .inc();

        let mut sessions = self.registry.sessions.write().await;
        sessions.insert(session.id.clone(), session);
        PRACTICE_SESSIONS_ACTIVE.set(sessions.len() as i64);
        view
    }

    async fn prune(&self) {
        let removed = self
            .registry
            .prune(Duration::seconds(self.config.session_ttl_seconds))
            .await;
        if removed > 0 {
            tracing::debug!("Pruned {} idle practice sessions", removed);
        }
    }
}

fn owned_session<'a>(
    sessions: &'a mut HashMap<String, PracticeSession>,
    user_id: &str,
    session_id: &str,
) -> AppResult<&'a mut PracticeSession> {
    let session = sessions
        .get_mut(session_id)
        .ok_or_else(|| AppError::NotFound(format!("Practice session {} not found", session_id)))?;
    if session.user_id != user_id {
        return Err(AppError::Forbidden(
            "This practice session belongs to another user".to_string(),
        ));
    }
    Ok(session)
}

/// Marks the session finished and returns what must be written to the profile.
fn close(session: &mut PracticeSession, now: DateTime<Utc>) -> Outcome {
    let summary = session.grade(now);
    let mistake_deltas = session.closing_mistake_deltas(&summary);
    let outcome = Outcome {
        entry: HistoryEntry {
            mode: session.mode,
            score: summary.score,
            total: summary.total,
            time_spent_seconds: summary.time_spent_seconds,
            finished_at: now,
            test_id: None,
            title: session.title.clone(),
        },
        answered: u64::from(summary.answered),
        mistake_deltas,
    };
    PRACTICE_SESSIONS_TOTAL
        .with_label_values(&[session.mode.as_str(), "finished"])
        .inc();
    session.last_activity = now;
    session.summary = Some(summary);
    outcome
}

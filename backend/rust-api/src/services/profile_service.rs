use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::models::user::{MistakeItem, ModeStats, UserStats};
use crate::models::{HistoryEntry, UserProfile};
use crate::store::{self, Query, SharedStore, PROFILES};

use super::question_bank::QuestionBank;

const TOP_MISTAKES: usize = 10;
const RECENT_HISTORY: usize = 10;

/// Result of a finished practice session or graded attempt
#[derive(Debug, Clone)]
pub struct Outcome {
    pub entry: HistoryEntry,
    pub answered: u64,
    /// question id -> change of its mistake count
    pub mistake_deltas: Vec<(String, i32)>,
}

#[derive(Debug, Serialize)]
struct ProgressPatch<'a> {
    mistakes: &'a BTreeMap<String, u32>,
    history: &'a [HistoryEntry],
    total_time_seconds: i64,
    total_questions: u64,
    total_sessions: u64,
}

pub struct ProfileService {
    store: SharedStore,
    history_limit: usize,
}

impl ProfileService {
    pub fn new(store: SharedStore, history_limit: usize) -> Self {
        Self {
            store,
            history_limit,
        }
    }

    pub async fn get(&self, user_id: &str) -> AppResult<UserProfile> {
        store::find_one(self.store.as_ref(), PROFILES, &Query::by_id(user_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))
    }

    pub async fn find_by_username(&self, username: &str) -> AppResult<Option<UserProfile>> {
        Ok(store::find_one(
            self.store.as_ref(),
            PROFILES,
            &Query::new().eq("username", username),
        )
        .await?)
    }

    /// Appends history, adds totals and applies mistake deltas in one write.
    pub async fn record_outcome(&self, user_id: &str, outcome: Outcome) -> AppResult<UserProfile> {
        let mut profile = self.get(user_id).await?;

        for (question_id, delta) in &outcome.mistake_deltas {
            apply_mistake_delta(&mut profile.mistakes, question_id, *delta);
        }
        profile.total_time_seconds += outcome.entry.time_spent_seconds.max(0);
        profile.total_questions += outcome.answered;
        profile.total_sessions = profile.session_count() as u64 + 1;
        push_history(&mut profile.history, outcome.entry, self.history_limit);

        self.write_progress(&profile).await?;
        tracing::info!(
            "Recorded outcome for user {}: {} history entries, {} open mistakes",
            user_id,
            profile.history.len(),
            profile.mistakes.len()
        );
        Ok(profile)
    }

    /// Per-answer mistake bookkeeping for the feedback modes.
    pub async fn adjust_mistake(
        &self,
        user_id: &str,
        question_id: &str,
        delta: i32,
    ) -> AppResult<()> {
        let mut profile = self.get(user_id).await?;
        apply_mistake_delta(&mut profile.mistakes, question_id, delta);
        store::update_by_id(
            self.store.as_ref(),
            PROFILES,
            user_id,
            &json!({ "mistakes": profile.mistakes }),
        )
        .await?;
        tracing::debug!("Mistake {} for user {} changed by {}", question_id, user_id, delta);
        Ok(())
    }

    pub async fn clear_mistake(&self, user_id: &str, question_id: &str) -> AppResult<()> {
        let mut profile = self.get(user_id).await?;
        if profile.mistakes.remove(question_id).is_none() {
            return Err(AppError::NotFound(format!(
                "No mistake recorded for question {}",
                question_id
            )));
        }
        store::update_by_id(
            self.store.as_ref(),
            PROFILES,
            user_id,
            &json!({ "mistakes": profile.mistakes }),
        )
        .await?;
        tracing::info!("Cleared mistake {} for user {}", question_id, user_id);
        Ok(())
    }

    pub async fn mistakes(
        &self,
        user_id: &str,
        bank: &QuestionBank,
    ) -> AppResult<Vec<MistakeItem>> {
        let profile = self.get(user_id).await?;
        mistake_items(&profile.mistakes, None, bank).await
    }

    pub async fn history(&self, user_id: &str) -> AppResult<Vec<HistoryEntry>> {
        let mut history = self.get(user_id).await?.history;
        history.reverse();
        Ok(history)
    }

    pub async fn stats(&self, user_id: &str, bank: &QuestionBank) -> AppResult<UserStats> {
        let profile = self.get(user_id).await?;
        let top_mistakes = mistake_items(&profile.mistakes, Some(TOP_MISTAKES), bank).await?;

        let recent: Vec<HistoryEntry> = profile
            .history
            .iter()
            .rev()
            .take(RECENT_HISTORY)
            .cloned()
            .collect();

        Ok(UserStats {
            username: profile.username.clone(),
            class_name: profile.class_name.clone(),
            total_questions: profile.total_questions,
            total_time_seconds: profile.total_time_seconds,
            sessions: profile.session_count(),
            average_percentage: average_percentage(&profile.history).unwrap_or(0.0),
            by_mode: by_mode(&profile.history),
            mistakes_count: profile.mistakes.len(),
            top_mistakes,
            recent,
        })
    }

    async fn write_progress(&self, profile: &UserProfile) -> AppResult<()> {
        let patch = ProgressPatch {
            mistakes: &profile.mistakes,
            history: &profile.history,
            total_time_seconds: profile.total_time_seconds,
            total_questions: profile.total_questions,
            total_sessions: profile.total_sessions,
        };
        let updated =
            store::update_by_id(self.store.as_ref(), PROFILES, &profile.id, &patch).await?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("User {} not found", profile.id)));
        }
        Ok(())
    }
}

/// Positive deltas add, negative ones pay back; entries at zero are dropped.
pub fn apply_mistake_delta(mistakes: &mut BTreeMap<String, u32>, question_id: &str, delta: i32) {
    let current = mistakes.get(question_id).copied().unwrap_or(0);
    let next = (i64::from(current) + i64::from(delta)).max(0) as u32;
    if next == 0 {
        mistakes.remove(question_id);
    } else {
        mistakes.insert(question_id.to_string(), next);
    }
}

/// Keeps the newest `limit` entries, oldest first.
pub fn push_history(history: &mut Vec<HistoryEntry>, entry: HistoryEntry, limit: usize) {
    history.push(entry);
    if history.len() > limit {
        let excess = history.len() - limit;
        history.drain(..excess);
    }
}

pub fn average_percentage(history: &[HistoryEntry]) -> Option<f64> {
    if history.is_empty() {
        return None;
    }
    let sum: f64 = history.iter().map(HistoryEntry::percentage).sum();
    Some(sum / history.len() as f64)
}

fn by_mode(history: &[HistoryEntry]) -> BTreeMap<String, ModeStats> {
    let mut grouped: HashMap<&'static str, Vec<&HistoryEntry>> = HashMap::new();
    for entry in history {
        grouped.entry(entry.mode.as_str()).or_default().push(entry);
    }
    grouped
        .into_iter()
        .map(|(mode, entries)| {
            let sum: f64 = entries.iter().map(|e| e.percentage()).sum();
            let stats = ModeStats {
                sessions: entries.len(),
                average_percentage: sum / entries.len() as f64,
            };
            (mode.to_string(), stats)
        })
        .collect()
}

async fn mistake_items(
    mistakes: &BTreeMap<String, u32>,
    limit: Option<usize>,
    bank: &QuestionBank,
) -> AppResult<Vec<MistakeItem>> {
    let mut ranked: Vec<(&String, &u32)> = mistakes.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    if let Some(limit) = limit {
        ranked.truncate(limit);
    }

    let ids: Vec<String> = ranked.iter().map(|(id, _)| (*id).clone()).collect();
    let questions: HashMap<String, _> = bank
        .get_many(&ids)
        .await?
        .into_iter()
        .map(|q| (q.id.clone(), q))
        .collect();

    Ok(ranked
        .into_iter()
        .map(|(id, count)| {
            let question = questions.get(id);
            MistakeItem {
                question_id: id.clone(),
                count: *count,
                subject: question.map(|q| q.subject.clone()),
                number: question.map(|q| q.number),
                text: question.map(|q| q.text.clone()),
            }
        })
        .collect())
}

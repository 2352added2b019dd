use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast::error::RecvError, RwLock};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::metrics::{QUESTIONS_IMPORTED_TOTAL, QUESTION_CACHE_SIZE, QUESTION_CACHE_SYNCS_TOTAL};
use crate::models::question::{ImportReport, ImportRowError, QuestionInput, SubjectSummary};
use crate::models::Question;
use crate::store::{self, ChangeKind, Query, SharedStore, QUESTIONS};

use super::selection::in_topic;

#[derive(Default)]
struct QuestionCache {
    questions: HashMap<String, Question>,
    last_synced_at: Option<DateTime<Utc>>,
}

/// Local cache of the active question bank, kept in step with the row store.
#[derive(Clone)]
pub struct QuestionBank {
    store: SharedStore,
    cache: Arc<RwLock<QuestionCache>>,
    page_size: usize,
    ttl: Duration,
}

impl QuestionBank {
    pub fn new(store: SharedStore, page_size: usize, cache_ttl_seconds: i64) -> Self {
        Self {
            store,
            cache: Arc::new(RwLock::new(QuestionCache::default())),
            page_size,
            ttl: Duration::seconds(cache_ttl_seconds),
        }
    }

    /// Replaces the cache with every active question in the store.
    pub async fn sync(&self) -> AppResult<usize> {
        let query = Query::new().eq("active", true).order_by("number", true);
        let rows = match store::fetch_all(self.store.as_ref(), QUESTIONS, &query, self.page_size)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                QUESTION_CACHE_SYNCS_TOTAL.with_label_values(&["error"]).inc();
                tracing::error!("Question sync failed: {}", e);
                return Err(e.into());
            }
        };

        let mut questions = HashMap::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<Question>(row) {
                Ok(question) => {
                    questions.insert(question.id.clone(), question);
                }
                Err(e) => tracing::warn!("Skipping malformed question row: {}", e),
            }
        }

        let count = questions.len();
        {
            let mut cache = self.cache.write().await;
            cache.questions = questions;
            cache.last_synced_at = Some(Utc::now());
        }

        QUESTION_CACHE_SYNCS_TOTAL.with_label_values(&["success"]).inc();
        QUESTION_CACHE_SIZE.set(count as i64);
        tracing::info!("Question cache synced: {} active questions", count);
        Ok(count)
    }

    /// Syncs when the cache was never filled or has gone stale.
    pub async fn ensure_fresh(&self) -> AppResult<()> {
        let stale = {
            let cache = self.cache.read().await;
            match cache.last_synced_at {
                None => true,
                Some(at) => Utc::now() - at > self.ttl,
            }
        };
        if stale {
            self.sync().await?;
        }
        Ok(())
    }

    /// Merges row store change notifications into the cache until the
    /// feed closes. Falls back to a full sync after missing events.
    pub fn spawn_change_listener(&self) -> tokio::task::JoinHandle<()> {
        let bank = self.clone();
        let mut changes = self.store.subscribe(QUESTIONS);

        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(event) => bank.apply_change(event.kind, event.row).await,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(
                            "Question change feed lagged by {} events, resyncing",
                            missed
                        );
                        if let Err(e) = bank.sync().await {
                            tracing::error!("Resync after lag failed: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("Question change feed closed");
                        break;
                    }
                }
            }
        })
    }

    async fn apply_change(&self, kind: ChangeKind, row: Value) {
        let id = match row.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => return,
        };

        let mut cache = self.cache.write().await;
        match kind {
            ChangeKind::Delete => {
                cache.questions.remove(&id);
            }
            ChangeKind::Insert | ChangeKind::Update => {
                match serde_json::from_value::<Question>(row) {
                    Ok(question) if question.active => {
                        cache.questions.insert(id, question);
                    }
                    Ok(_) => {
                        cache.questions.remove(&id);
                    }
                    Err(e) => tracing::warn!("Ignoring malformed question change {}: {}", id, e),
                }
            }
        }
        QUESTION_CACHE_SIZE.set(cache.questions.len() as i64);
    }

    /// Active questions in a subject and inclusive number range, ordered.
    pub async fn list(
        &self,
        subject: Option<&str>,
        from: Option<u32>,
        to: Option<u32>,
    ) -> AppResult<Vec<Question>> {
        self.ensure_fresh().await?;
        let cache = self.cache.read().await;
        let mut questions: Vec<Question> = cache
            .questions
            .values()
            .filter(|q| in_topic(q, subject, from, to))
            .cloned()
            .collect();
        questions.sort_by(|a, b| {
            a.subject
                .cmp(&b.subject)
                .then(a.number.cmp(&b.number))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(questions)
    }

    pub async fn subjects(&self) -> AppResult<Vec<SubjectSummary>> {
        let questions = self.list(None, None, None).await?;
        let mut summaries: BTreeMap<String, SubjectSummary> = BTreeMap::new();
        for question in &questions {
            let summary = summaries
                .entry(question.subject.clone())
                .or_insert_with(|| SubjectSummary {
                    subject: question.subject.clone(),
                    question_count: 0,
                    first_number: question.number,
                    last_number: question.number,
                });
            summary.question_count += 1;
            summary.first_number = summary.first_number.min(question.number);
            summary.last_number = summary.last_number.max(question.number);
        }
        Ok(summaries.into_values().collect())
    }

    /// Looks in the cache first, then in the store (inactive questions included).
    pub async fn get(&self, id: &str) -> AppResult<Question> {
        if let Some(question) = self.cache.read().await.questions.get(id) {
            return Ok(question.clone());
        }
        store::find_one::<Question>(self.store.as_ref(), QUESTIONS, &Query::by_id(id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Question {} not found", id)))
    }

    /// Resolves ids in the given order, skipping ones that no longer exist.
    pub async fn get_many(&self, ids: &[String]) -> AppResult<Vec<Question>> {
        let mut found: HashMap<String, Question> = {
            let cache = self.cache.read().await;
            ids.iter()
                .filter_map(|id| cache.questions.get(id).map(|q| (id.clone(), q.clone())))
                .collect()
        };

        let missing: Vec<Value> = ids
            .iter()
            .filter(|id| !found.contains_key(*id))
            .map(|id| Value::String(id.clone()))
            .collect();
        if !missing.is_empty() {
            let rows: Vec<Question> = store::select_as(
                self.store.as_ref(),
                QUESTIONS,
                &Query::new().is_in("id", missing),
            )
            .await?;
            for question in rows {
                found.insert(question.id.clone(), question);
            }
        }

        Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    }

    pub async fn create(&self, input: QuestionInput) -> AppResult<Question> {
        input.validate()?;
        let question = Question {
            id: Uuid::new_v4().to_string(),
            subject: input.subject.trim().to_string(),
            number: input.number,
            text: input.text,
            options: input.options,
            correct_index: input.correct_index,
            active: input.active,
            image: input.image.filter(|i| !i.is_empty()),
            updated_at: Utc::now(),
        };

        let stored = store::insert_as(self.store.as_ref(), QUESTIONS, &question).await?;
        self.apply_change(ChangeKind::Insert, serde_json::to_value(&stored).unwrap_or_default())
            .await;
        tracing::info!(
            "Question created: {} ({} #{})",
            stored.id,
            stored.subject,
            stored.number
        );
        Ok(stored)
    }

    pub async fn update(&self, id: &str, input: QuestionInput) -> AppResult<Question> {
        input.validate()?;
        let mut question = self.get(id).await?;
        question.subject = input.subject.trim().to_string();
        question.number = input.number;
        question.text = input.text;
        question.options = input.options;
        question.correct_index = input.correct_index;
        question.active = input.active;
        question.image = input.image.filter(|i| !i.is_empty());
        question.updated_at = Utc::now();

        self.write_back(&question).await?;
        tracing::info!("Question updated: {}", id);
        Ok(question)
    }

    /// Questions are never hard-deleted so old attempts stay reviewable.
    pub async fn deactivate(&self, id: &str) -> AppResult<()> {
        let mut question = self.get(id).await?;
        question.active = false;
        question.updated_at = Utc::now();
        self.write_back(&question).await?;
        tracing::info!("Question deactivated: {}", id);
        Ok(())
    }

    async fn write_back(&self, question: &Question) -> AppResult<()> {
        let updated = store::update_by_id(self.store.as_ref(), QUESTIONS, &question.id, question)
            .await?;
        if updated == 0 {
            return Err(AppError::NotFound(format!(
                "Question {} not found",
                question.id
            )));
        }
        self.apply_change(
            ChangeKind::Update,
            serde_json::to_value(question).unwrap_or_default(),
        )
        .await;
        Ok(())
    }

    /// Bulk upload. Rows matching an existing (subject, number) replace it.
    pub async fn import_csv(&self, content: &str) -> AppResult<ImportReport> {
        let parsed = parse_questions_csv(content)?;
        let mut report = ImportReport {
            errors: parsed.errors,
            ..ImportReport::default()
        };

        for (line, input) in parsed.rows {
            let existing: Option<Question> = store::find_one(
                self.store.as_ref(),
                QUESTIONS,
                &Query::new()
                    .eq("subject", input.subject.as_str())
                    .eq("number", input.number),
            )
            .await?;

            let outcome = match existing {
                Some(question) => self.update(&question.id, input).await.map(|_| true),
                None => self.create(input).await.map(|_| false),
            };

            match outcome {
                Ok(true) => report.updated += 1,
                Ok(false) => report.inserted += 1,
                Err(AppError::Store(e)) => return Err(AppError::Store(e)),
                Err(e) => report.errors.push(ImportRowError {
                    line,
                    message: e.to_string(),
                }),
            }
        }

        QUESTIONS_IMPORTED_TOTAL
            .with_label_values(&["inserted"])
            .inc_by(report.inserted as u64);
        QUESTIONS_IMPORTED_TOTAL
            .with_label_values(&["updated"])
            .inc_by(report.updated as u64);
        QUESTIONS_IMPORTED_TOTAL
            .with_label_values(&["rejected"])
            .inc_by(report.errors.len() as u64);

        tracing::info!(
            "CSV import finished: {} inserted, {} updated, {} rejected",
            report.inserted,
            report.updated,
            report.errors.len()
        );
        Ok(report)
    }
}

#[derive(Debug, Deserialize)]
struct CsvQuestionRow {
    subject: String,
    number: String,
    text: String,
    #[serde(default)]
    option_a: String,
    #[serde(default)]
    option_b: String,
    #[serde(default)]
    option_c: String,
    #[serde(default)]
    option_d: String,
    correct: String,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Default)]
struct ParsedCsv {
    rows: Vec<(u64, QuestionInput)>,
    errors: Vec<ImportRowError>,
}

fn parse_questions_csv(content: &str) -> AppResult<ParsedCsv> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| AppError::BadRequest(format!("Unreadable CSV header: {}", e)))?
        .clone();
    for required in ["subject", "number", "text", "option_a", "option_b", "correct"] {
        if !headers.iter().any(|h| h.eq_ignore_ascii_case(required)) {
            return Err(AppError::BadRequest(format!(
                "CSV header is missing the '{}' column",
                required
            )));
        }
    }
    let lowered = csv::StringRecord::from(
        headers
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect::<Vec<_>>(),
    );

    let mut parsed = ParsedCsv::default();
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                parsed.errors.push(ImportRowError {
                    line,
                    message: e.to_string(),
                });
                continue;
            }
        };
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        let row: CsvQuestionRow = match record.deserialize(Some(&lowered)) {
            Ok(row) => row,
            Err(e) => {
                parsed.errors.push(ImportRowError {
                    line,
                    message: e.to_string(),
                });
                continue;
            }
        };

        match csv_row_to_input(row) {
            Ok(input) => parsed.rows.push((line, input)),
            Err(message) => parsed.errors.push(ImportRowError { line, message }),
        }
    }

    Ok(parsed)
}

fn csv_row_to_input(row: CsvQuestionRow) -> Result<QuestionInput, String> {
    let number: u32 = row
        .number
        .parse()
        .map_err(|_| format!("'{}' is not a question number", row.number))?;

    let options: Vec<String> = [row.option_a, row.option_b, row.option_c, row.option_d]
        .into_iter()
        .filter(|o| !o.is_empty())
        .collect();

    let correct_index = parse_correct(&row.correct)
        .ok_or_else(|| format!("'{}' is not a valid correct answer (A-D or 1-4)", row.correct))?;

    let input = QuestionInput {
        subject: row.subject,
        number,
        text: row.text,
        options,
        correct_index,
        image: row.image.filter(|i| !i.is_empty()),
        active: true,
    };
    input.validate().map_err(|e| e.to_string())?;
    Ok(input)
}

/// Accepts a letter (A-D) or a 1-based position.
fn parse_correct(value: &str) -> Option<usize> {
    let value = value.trim();
    let mut chars = value.chars();
    if let (Some(letter), None) = (chars.next(), chars.next()) {
        if letter.is_ascii_alphabetic() {
            let index = (letter.to_ascii_uppercase() as u8).checked_sub(b'A')? as usize;
            return (index < 4).then_some(index);
        }
    }
    value.parse::<usize>().ok()?.checked_sub(1)
}

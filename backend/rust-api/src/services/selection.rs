//! Question subset selection for the practice modes and scheduled tests.
//!
//! Every function is pure over the question pool and takes the RNG as a
//! parameter so results are reproducible under a seeded generator.

use std::collections::{BTreeMap, HashSet};

use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;

use crate::models::{Question, ScheduledTest};

/// Share of a smart session reserved for past mistakes.
const SMART_MISTAKE_SHARE: f64 = 0.6;

/// Whether `question` lies in `subject` (if given) and the inclusive number range.
pub fn in_topic(
    question: &Question,
    subject: Option<&str>,
    from: Option<u32>,
    to: Option<u32>,
) -> bool {
    subject.map_or(true, |s| question.subject.eq_ignore_ascii_case(s))
        && from.map_or(true, |from| question.number >= from)
        && to.map_or(true, |to| question.number <= to)
}

pub fn shuffled<R: Rng + ?Sized>(
    pool: &[Question],
    limit: Option<usize>,
    rng: &mut R,
) -> Vec<Question> {
    let mut picked = pool.to_vec();
    picked.shuffle(rng);
    if let Some(limit) = limit {
        picked.truncate(limit);
    }
    picked
}

/// `count` distinct random questions, or the whole pool when it is smaller.
pub fn mock_exam<R: Rng + ?Sized>(pool: &[Question], count: usize, rng: &mut R) -> Vec<Question> {
    pool.choose_multiple(rng, count).cloned().collect()
}

/// Topic range in curriculum order.
pub fn training(pool: &[Question], limit: Option<usize>) -> Vec<Question> {
    let mut ordered = pool.to_vec();
    ordered.sort_by(|a, b| {
        a.subject
            .cmp(&b.subject)
            .then(a.number.cmp(&b.number))
            .then_with(|| a.id.cmp(&b.id))
    });
    if let Some(limit) = limit {
        ordered.truncate(limit);
    }
    ordered
}

/// Mistake-weighted review: up to 60% of the slots go to questions with
/// outstanding mistakes (highest count first, ties broken randomly), the
/// rest is drawn at random from the remaining pool.
pub fn smart<R: Rng + ?Sized>(
    pool: &[Question],
    mistakes: &BTreeMap<String, u32>,
    size: usize,
    rng: &mut R,
) -> Vec<Question> {
    if size == 0 || pool.is_empty() {
        return Vec::new();
    }

    let mut weak: Vec<&Question> = pool
        .iter()
        .filter(|q| mistakes.get(&q.id).copied().unwrap_or(0) > 0)
        .collect();
    weak.shuffle(rng);
    weak.sort_by_key(|q| std::cmp::Reverse(mistakes.get(&q.id).copied().unwrap_or(0)));

    let mistake_slots = ((size as f64) * SMART_MISTAKE_SHARE).ceil() as usize;
    let mut picked: Vec<Question> = weak
        .into_iter()
        .take(mistake_slots)
        .cloned()
        .collect();

    let taken: HashSet<&str> = picked.iter().map(|q| q.id.as_str()).collect();
    let rest: Vec<&Question> = pool
        .iter()
        .filter(|q| !taken.contains(q.id.as_str()))
        .collect();
    let fill = size.saturating_sub(picked.len());
    picked.extend(rest.choose_multiple(rng, fill).map(|q| (*q).clone()));

    picked.shuffle(rng);
    picked
}

/// Every question with an outstanding mistake, shuffled.
pub fn mistakes<R: Rng + ?Sized>(
    pool: &[Question],
    mistakes: &BTreeMap<String, u32>,
    rng: &mut R,
) -> Vec<Question> {
    let mut picked: Vec<Question> = pool
        .iter()
        .filter(|q| mistakes.get(&q.id).copied().unwrap_or(0) > 0)
        .cloned()
        .collect();
    picked.shuffle(rng);
    picked
}

/// Random questions from the test's subject and number range.
pub fn for_scheduled_test<R: Rng + ?Sized>(
    pool: &[Question],
    test: &ScheduledTest,
    rng: &mut R,
) -> Vec<Question> {
    let eligible: Vec<Question> = pool
        .iter()
        .filter(|q| {
            in_topic(
                q,
                Some(&test.subject),
                Some(test.number_from),
                Some(test.number_to),
            )
        })
        .cloned()
        .collect();
    mock_exam(&eligible, test.question_count, rng)
}

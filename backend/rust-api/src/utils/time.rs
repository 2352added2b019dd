use chrono::{DateTime, Duration, Utc};

/// Deadline of a timed attempt: the time limit, cut short by the window close.
pub fn attempt_deadline(
    started_at: DateTime<Utc>,
    time_limit_minutes: u32,
    closes_at: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    let by_limit = started_at + Duration::minutes(i64::from(time_limit_minutes));
    match closes_at {
        Some(closes_at) if closes_at < by_limit => closes_at,
        _ => by_limit,
    }
}

/// Whole seconds left until `deadline`, never negative.
pub fn remaining_seconds(deadline: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (deadline - now).num_seconds().max(0)
}

/// Seconds between start and `now`, capped at `deadline` when one is given.
pub fn elapsed_seconds(
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
    deadline: Option<DateTime<Utc>>,
) -> i64 {
    let end = match deadline {
        Some(deadline) if deadline < now => deadline,
        _ => now,
    };
    (end - started_at).num_seconds().max(0)
}

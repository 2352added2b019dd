use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Extension,
};
use chrono::Utc;
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::sleep;

use crate::{
    error::{AppError, AppResult},
    metrics::SSE_CONNECTIONS_ACTIVE,
    middlewares::auth::JwtClaims,
    models::{
        timer::{SessionSuperseded, TimeExpired, TimerEvent, TimerTick},
        TestStatus,
    },
    services::{exam_service::AttemptClock, AppState},
    store::{ChangeEvent, ChangeKind, PROFILES},
    utils::time::{elapsed_seconds, remaining_seconds},
};

/// Keeps the SSE connection gauge in step with live streams.
struct ConnectionGuard;

impl ConnectionGuard {
    fn open() -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        ConnectionGuard
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
    }
}

fn to_event(timer_event: &TimerEvent) -> Event {
    Event::default()
        .event(timer_event.event_name())
        .data(timer_event.to_sse_data())
}

/// GET /api/v1/exams/attempts/{id}/stream
pub async fn attempt_stream(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let clock = state.exam_service().clock(&claims.sub, &attempt_id).await?;
    let tick_interval = Duration::from_millis(state.config.sse.tick_interval_ms.max(100));
    tracing::info!(
        "Timer stream opened: attempt={}, deadline={}",
        attempt_id,
        clock.deadline
    );

    let stream = timer_stream(state, clock, tick_interval);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

struct TimerState {
    app: Arc<AppState>,
    clock: AttemptClock,
    tick_interval: Duration,
    first: bool,
    done: bool,
    _guard: ConnectionGuard,
}

/// Every tick is recomputed from the stored start time and the wall clock,
/// so a client that was suspended resumes with the correct countdown.
/// The stored status is re-read each tick; a submitted attempt ends the stream.
fn timer_stream(
    app: Arc<AppState>,
    clock: AttemptClock,
    tick_interval: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let initial = TimerState {
        app,
        clock,
        tick_interval,
        first: true,
        done: false,
        _guard: ConnectionGuard::open(),
    };

    stream::unfold(initial, |mut st| async move {
        if st.done {
            return None;
        }
        if !st.first {
            sleep(st.tick_interval).await;
        }
        st.first = false;

        match st.app.exam_service().status(&st.clock.attempt_id).await {
            Ok(status) => st.clock.status = status,
            Err(AppError::NotFound(_)) => {
                tracing::info!("Timer stream closed, attempt {} was removed", st.clock.attempt_id);
                return None;
            }
            Err(e) => tracing::warn!("Timer status refresh failed: {}", e),
        }

        let now = Utc::now();
        let clock = &st.clock;
        if clock.status == TestStatus::Completed || now >= clock.deadline {
            if clock.status == TestStatus::Running {
                if let Err(e) = st.app.exam_service().expire_if_due(&clock.attempt_id).await {
                    tracing::error!("Auto-submit of attempt {} failed: {}", clock.attempt_id, e);
                }
            }
            let message = if now >= clock.deadline {
                "Time limit reached"
            } else {
                "Attempt submitted"
            };
            let expired = TimerEvent::TimeExpired(TimeExpired {
                attempt_id: clock.attempt_id.clone(),
                timestamp: now,
                message: message.to_string(),
            });
            tracing::info!("Timer finished: attempt={}, reason={}", clock.attempt_id, message);
            st.done = true;
            return Some((Ok(to_event(&expired)), st));
        }

        let tick = TimerEvent::TimerTick(TimerTick {
            attempt_id: clock.attempt_id.clone(),
            remaining_seconds: remaining_seconds(clock.deadline, now),
            elapsed_seconds: elapsed_seconds(clock.started_at, now, Some(clock.deadline)),
            total_seconds: (clock.deadline - clock.started_at).num_seconds().max(0),
            timestamp: now,
        });
        Some((Ok(to_event(&tick)), st))
    })
}

/// GET /api/v1/auth/session/watch
///
/// Emits `session-superseded` once the caller's login is replaced or ended.
pub async fn session_watch(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> AppResult<impl IntoResponse> {
    let changes = state.store.subscribe(PROFILES);
    tracing::info!("Session watch opened for user {}", claims.sub);

    let stream = session_stream(state, changes, claims);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

struct WatchState {
    app: Arc<AppState>,
    changes: broadcast::Receiver<ChangeEvent>,
    claims: JwtClaims,
    _guard: ConnectionGuard,
}

/// Whether a profile row no longer carries the session the token was issued for.
fn supersedes(event: &ChangeEvent, claims: &JwtClaims) -> bool {
    if event.row.get("id").and_then(|v| v.as_str()) != Some(claims.sub.as_str()) {
        return false;
    }
    match event.kind {
        ChangeKind::Delete => true,
        ChangeKind::Insert | ChangeKind::Update => match event.row.get("active_session") {
            Some(value) => value.as_str() != Some(claims.sid.as_str()),
            None => false,
        },
    }
}

fn session_stream(
    app: Arc<AppState>,
    changes: broadcast::Receiver<ChangeEvent>,
    claims: JwtClaims,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let initial = WatchState {
        app,
        changes,
        claims,
        _guard: ConnectionGuard::open(),
    };

    stream::unfold(Some(initial), |state| async move {
        let mut st = state?;
        loop {
            let superseded = match st.changes.recv().await {
                Ok(event) => supersedes(&event, &st.claims),
                Err(RecvError::Lagged(_)) => {
                    match st.app.profile_service().get(&st.claims.sub).await {
                        Ok(profile) => {
                            profile.active_session.as_deref() != Some(st.claims.sid.as_str())
                        }
                        Err(e) => {
                            tracing::warn!("Session watch recheck failed: {}", e);
                            false
                        }
                    }
                }
                Err(RecvError::Closed) => return None,
            };

            if superseded {
                let notice = TimerEvent::SessionSuperseded(SessionSuperseded {
                    user_id: st.claims.sub.clone(),
                    timestamp: Utc::now(),
                    message: "This account signed in elsewhere".to_string(),
                });
                tracing::info!("Session superseded for user {}", st.claims.sub);
                return Some((Ok(to_event(&notice)), None));
            }
        }
    })
}

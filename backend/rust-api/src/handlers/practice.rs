use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::{
    error::AppResult,
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::practice::{CustomSet, PracticeAnswerRequest, StartPracticeRequest},
    services::AppState,
};

/// POST /api/v1/practice
pub async fn start_practice(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<StartPracticeRequest>,
) -> AppResult<impl IntoResponse> {
    tracing::info!(
        "Starting {} practice for user {}",
        req.mode.as_str(),
        claims.sub
    );
    let session = state.practice_service().start(&claims.sub, req).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// POST /api/v1/practice/custom
pub async fn start_custom(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(set): AppJson<CustomSet>,
) -> AppResult<impl IntoResponse> {
    tracing::info!(
        "Starting custom set '{}' ({} questions) for user {}",
        set.title,
        set.questions.len(),
        claims.sub
    );
    let session = state.practice_service().start_custom(&claims.sub, set).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /api/v1/practice/{id}
pub async fn get_practice(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.practice_service().get(&claims.sub, &session_id).await?))
}

/// POST /api/v1/practice/{id}/answers
pub async fn answer_practice(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<PracticeAnswerRequest>,
) -> AppResult<impl IntoResponse> {
    let response = state
        .practice_service()
        .answer(&claims.sub, &session_id, req)
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/practice/{id}/finish
pub async fn finish_practice(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    tracing::info!("Finishing practice session {}", session_id);
    let summary = state
        .practice_service()
        .finish(&claims.sub, &session_id)
        .await?;
    Ok(Json(summary))
}

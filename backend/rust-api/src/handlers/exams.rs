use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::{
    error::AppResult,
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::exam::SaveAnswerRequest,
    services::AppState,
};

/// GET /api/v1/exams
pub async fn list_exams(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.exam_service().list_available(&claims.sub).await?))
}

/// POST /api/v1/exams/{test_id}/start
pub async fn start_exam(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(test_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    tracing::info!("User {} starting test {}", claims.sub, test_id);
    let attempt = state
        .exam_service()
        .start_or_resume(&claims.sub, &test_id)
        .await?;
    Ok(Json(attempt))
}

/// GET /api/v1/exams/attempts/{id}
pub async fn get_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let attempt = state
        .exam_service()
        .get_attempt(&claims.sub, claims.is_teacher(), &attempt_id)
        .await?;
    Ok(Json(attempt))
}

/// PUT /api/v1/exams/attempts/{id}/answers
pub async fn save_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
    AppJson(req): AppJson<SaveAnswerRequest>,
) -> AppResult<impl IntoResponse> {
    let saved = state
        .exam_service()
        .save_answer(&claims.sub, &attempt_id, req)
        .await?;
    Ok(Json(saved))
}

/// POST /api/v1/exams/attempts/{id}/submit
pub async fn submit_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    tracing::info!("User {} submitting attempt {}", claims.sub, attempt_id);
    let attempt = state
        .exam_service()
        .submit(&claims.sub, &attempt_id)
        .await?;
    Ok(Json(attempt))
}

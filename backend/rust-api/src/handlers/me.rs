use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::{error::AppResult, middlewares::auth::JwtClaims, services::AppState};

/// GET /api/v1/me/stats
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> AppResult<impl IntoResponse> {
    let stats = state
        .profile_service()
        .stats(&claims.sub, &state.questions)
        .await?;
    Ok(Json(stats))
}

/// GET /api/v1/me/history (newest first)
pub async fn history(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.profile_service().history(&claims.sub).await?))
}

/// GET /api/v1/me/mistakes
pub async fn mistakes(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> AppResult<impl IntoResponse> {
    let mistakes = state
        .profile_service()
        .mistakes(&claims.sub, &state.questions)
        .await?;
    Ok(Json(mistakes))
}

/// DELETE /api/v1/me/mistakes/{question_id}
pub async fn clear_mistake(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(question_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    state
        .profile_service()
        .clear_mistake(&claims.sub, &question_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

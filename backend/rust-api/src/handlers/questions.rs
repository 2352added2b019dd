use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::{
    error::{AppError, AppResult},
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::question::{ListQuestionsQuery, QuestionInput},
    services::AppState,
};

/// GET /api/v1/questions?subject&from&to
///
/// Students get questions without the correct index; teachers get full rows.
pub async fn list_questions(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<ListQuestionsQuery>,
) -> AppResult<impl IntoResponse> {
    let questions = state
        .questions
        .list(query.subject.as_deref(), query.from, query.to)
        .await?;

    if claims.is_teacher() {
        Ok(Json(json!(questions)))
    } else {
        let views: Vec<_> = questions.iter().map(|q| q.view()).collect();
        Ok(Json(json!(views)))
    }
}

/// GET /api/v1/questions/subjects
pub async fn list_subjects(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    Ok(Json(state.questions.subjects().await?))
}

/// GET /api/v1/questions/{id}
pub async fn get_question(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let question = state.questions.get(&id).await?;
    if claims.is_teacher() {
        Ok(Json(json!(question)))
    } else if question.active {
        Ok(Json(json!(question.view())))
    } else {
        Err(AppError::NotFound(format!("Question {} not found", id)))
    }
}

/// POST /api/v1/questions
pub async fn create_question(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(input): AppJson<QuestionInput>,
) -> AppResult<impl IntoResponse> {
    tracing::info!("Teacher {} creating question {} #{}", claims.sub, input.subject, input.number);
    let question = state.questions.create(input).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

/// PUT /api/v1/questions/{id}
pub async fn update_question(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppJson(input): AppJson<QuestionInput>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.questions.update(&id, input).await?))
}

/// DELETE /api/v1/questions/{id}
pub async fn delete_question(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    state.questions.deactivate(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/questions/import (text/csv body)
pub async fn import_questions(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    headers: HeaderMap,
    body: String,
) -> AppResult<impl IntoResponse> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.is_empty() && !content_type.starts_with("text/") {
        return Err(AppError::BadRequest(
            "Send the question file as text/csv".to_string(),
        ));
    }
    if body.trim().is_empty() {
        return Err(AppError::BadRequest("The CSV file is empty".to_string()));
    }

    tracing::info!("Teacher {} importing {} bytes of CSV", claims.sub, body.len());
    let report = state.questions.import_csv(&body).await?;
    Ok(Json(report))
}

/// POST /api/v1/questions/sync
pub async fn sync_questions(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    let count = state.questions.sync().await?;
    Ok(Json(json!({ "synced": count })))
}

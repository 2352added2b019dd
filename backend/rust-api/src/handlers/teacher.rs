use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::{
    error::AppResult,
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{exam::ScheduledTestInput, user::StudentsQuery},
    services::AppState,
};

/// GET /api/v1/teacher/tests
pub async fn list_tests(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    Ok(Json(state.schedule_service().list().await?))
}

/// POST /api/v1/teacher/tests
pub async fn create_test(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(input): AppJson<ScheduledTestInput>,
) -> AppResult<impl IntoResponse> {
    tracing::info!("Teacher {} scheduling test '{}'", claims.sub, input.title);
    let test = state.schedule_service().create(&claims.sub, input).await?;
    Ok((StatusCode::CREATED, Json(test)))
}

/// GET /api/v1/teacher/tests/{id}
pub async fn get_test(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.schedule_service().get(&test_id).await?))
}

/// PUT /api/v1/teacher/tests/{id}
pub async fn update_test(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
    AppJson(input): AppJson<ScheduledTestInput>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.schedule_service().update(&test_id, input).await?))
}

/// DELETE /api/v1/teacher/tests/{id}
pub async fn delete_test(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(test_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    tracing::info!("Teacher {} deleting test {}", claims.sub, test_id);
    state.schedule_service().delete(&test_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/teacher/tests/{id}/results
pub async fn test_results(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.schedule_service().results(&test_id).await?))
}

/// DELETE /api/v1/teacher/tests/{id}/results/{result_id}
pub async fn reset_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((test_id, result_id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    tracing::info!(
        "Teacher {} resetting attempt {} of test {}",
        claims.sub,
        result_id,
        test_id
    );
    state
        .schedule_service()
        .reset_attempt(&test_id, &result_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/teacher/students?class=
pub async fn list_students(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StudentsQuery>,
) -> AppResult<impl IntoResponse> {
    let students = state
        .schedule_service()
        .students(query.class_name.as_deref())
        .await?;
    Ok(Json(students))
}

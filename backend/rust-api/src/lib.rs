use axum::{
    http::{header, Method},
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    let authenticated = Router::new()
        .nest("/questions", question_routes())
        .nest("/practice", practice_routes())
        .nest("/exams", exam_routes())
        .nest("/me", me_routes())
        .nest("/teacher", teacher_routes())
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/session/watch", get(handlers::sse::session_watch))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::auth::auth_middleware,
        ));

    let public = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api/v1", public.merge(authenticated))
        .with_state(app_state)
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn(middlewares::metrics::metrics_middleware))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn question_routes() -> Router<Arc<AppState>> {
    let authoring = Router::new()
        .route("/", post(handlers::questions::create_question))
        .route(
            "/{id}",
            put(handlers::questions::update_question).delete(handlers::questions::delete_question),
        )
        .route("/import", post(handlers::questions::import_questions))
        .route("/sync", post(handlers::questions::sync_questions))
        .route_layer(middleware::from_fn(
            middlewares::auth::teacher_guard_middleware,
        ));

    Router::new()
        .route("/", get(handlers::questions::list_questions))
        .route("/subjects", get(handlers::questions::list_subjects))
        .route("/{id}", get(handlers::questions::get_question))
        .merge(authoring)
}

fn practice_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::practice::start_practice))
        .route("/custom", post(handlers::practice::start_custom))
        .route("/{id}", get(handlers::practice::get_practice))
        .route("/{id}/answers", post(handlers::practice::answer_practice))
        .route("/{id}/finish", post(handlers::practice::finish_practice))
}

fn exam_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::exams::list_exams))
        .route("/{test_id}/start", post(handlers::exams::start_exam))
        .route("/attempts/{id}", get(handlers::exams::get_attempt))
        .route("/attempts/{id}/answers", put(handlers::exams::save_answer))
        .route("/attempts/{id}/submit", post(handlers::exams::submit_attempt))
        .route("/attempts/{id}/stream", get(handlers::sse::attempt_stream))
}

fn me_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stats", get(handlers::me::stats))
        .route("/history", get(handlers::me::history))
        .route("/mistakes", get(handlers::me::mistakes))
        .route("/mistakes/{question_id}", delete(handlers::me::clear_mistake))
}

fn teacher_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/tests",
            get(handlers::teacher::list_tests).post(handlers::teacher::create_test),
        )
        .route(
            "/tests/{id}",
            get(handlers::teacher::get_test)
                .put(handlers::teacher::update_test)
                .delete(handlers::teacher::delete_test),
        )
        .route("/tests/{id}/results", get(handlers::teacher::test_results))
        .route(
            "/tests/{id}/results/{result_id}",
            delete(handlers::teacher::reset_attempt),
        )
        .route("/students", get(handlers::teacher::list_students))
        .route_layer(middleware::from_fn(
            middlewares::auth::teacher_guard_middleware,
        ))
}

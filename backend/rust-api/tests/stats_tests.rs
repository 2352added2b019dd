use axum::http::StatusCode;
use serde_json::{json, Value};

mod common;

use common::{create_test_app, create_test_app_with, TestApp};

/// Runs a training session over the first `total` questions answering `wrong` of them wrongly.
async fn practice(app: &TestApp, token: &str, total: usize, wrong: usize) -> Value {
    let (_, session) = app
        .post(
            "/api/v1/practice",
            token,
            json!({ "mode": "training", "subject": "physics", "limit": total }),
        )
        .await;
    let id = session["id"].as_str().unwrap().to_string();
    for index in 0..total {
        let option = if index < wrong { 1 } else { 0 };
        app.post(
            &format!("/api/v1/practice/{}/answers", id),
            token,
            json!({ "question_index": index, "option_index": option }),
        )
        .await;
    }
    let (status, summary) = app
        .post(&format!("/api/v1/practice/{}/finish", id), token, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    summary
}

#[tokio::test]
async fn test_stats_for_new_user() {
    let app = create_test_app().await;
    let token = app.student("fresh", Some("7C")).await;

    let (status, stats) = app.get("/api/v1/me/stats", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["username"], "fresh");
    assert_eq!(stats["class_name"], "7C");
    assert_eq!(stats["sessions"], 0);
    assert_eq!(stats["average_percentage"], 0.0);
    assert!(stats["recent"].as_array().unwrap().is_empty());
    assert!(stats["top_mistakes"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_stats_aggregate_sessions() {
    let app = create_test_app().await;
    app.seed_questions("physics", 6).await;
    let token = app.student("student", None).await;

    let first = practice(&app, &token, 4, 1).await;
    assert_eq!(first["percentage"], 75.0);
    let second = practice(&app, &token, 4, 3).await;
    assert_eq!(second["percentage"], 25.0);

    let (status, stats) = app.get("/api/v1/me/stats", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["sessions"], 2);
    assert_eq!(stats["total_questions"], 8);
    assert_eq!(stats["average_percentage"], 50.0);
    assert_eq!(stats["by_mode"]["training"]["sessions"], 2);
    assert_eq!(stats["mistakes_count"], 3);

    let top = stats["top_mistakes"].as_array().unwrap();
    assert_eq!(top[0]["count"], 2);
    assert_eq!(top[0]["number"], 1);

    let (_, history) = app.get("/api/v1/me/history", &token).await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["score"], 1);
    assert_eq!(history[1]["score"], 3);

    let (_, me) = app.get("/api/v1/auth/me", &token).await;
    assert_eq!(me["total_questions"], 8);
    assert_eq!(me["mistakes_count"], 3);
}

#[tokio::test]
async fn test_session_count_outlives_history_cap() {
    let app = create_test_app_with(|config| config.practice.history_limit = 2).await;
    app.seed_questions("physics", 4).await;
    let teacher = app.teacher("teacher").await;
    let token = app.student("student", Some("8A")).await;

    for _ in 0..3 {
        practice(&app, &token, 2, 0).await;
    }

    let (_, history) = app.get("/api/v1/me/history", &token).await;
    assert_eq!(history.as_array().unwrap().len(), 2);

    let (_, stats) = app.get("/api/v1/me/stats", &token).await;
    assert_eq!(stats["sessions"], 3);
    assert_eq!(stats["total_questions"], 6);

    let (_, students) = app.get("/api/v1/teacher/students", &teacher).await;
    assert_eq!(students[0]["username"], "student");
    assert_eq!(students[0]["sessions"], 3);
}

#[tokio::test]
async fn test_clear_mistake() {
    let app = create_test_app().await;
    app.seed_questions("physics", 3).await;
    let token = app.student("student", None).await;
    practice(&app, &token, 2, 2).await;

    let (_, mistakes) = app.get("/api/v1/me/mistakes", &token).await;
    let mistakes = mistakes.as_array().unwrap();
    assert_eq!(mistakes.len(), 2);
    let question_id = mistakes[0]["question_id"].as_str().unwrap().to_string();

    let uri = format!("/api/v1/me/mistakes/{}", question_id);
    let (status, _) = app.request("DELETE", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, mistakes) = app.get("/api/v1/me/mistakes", &token).await;
    assert_eq!(mistakes.as_array().unwrap().len(), 1);

    let (status, _) = app.request("DELETE", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

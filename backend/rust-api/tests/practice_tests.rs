use axum::http::StatusCode;
use serde_json::{json, Value};

mod common;

use common::{create_test_app, create_test_app_with, TestApp};

async fn start(app: &TestApp, token: &str, body: Value) -> Value {
    let (status, session) = app.post("/api/v1/practice", token, body).await;
    assert_eq!(status, StatusCode::CREATED, "start failed: {}", session);
    session
}

async fn answer(
    app: &TestApp,
    token: &str,
    session_id: &str,
    question_index: usize,
    option_index: usize,
) -> (StatusCode, Value) {
    app.post(
        &format!("/api/v1/practice/{}/answers", session_id),
        token,
        json!({ "question_index": question_index, "option_index": option_index }),
    )
    .await
}

async fn finish(app: &TestApp, token: &str, session_id: &str) -> (StatusCode, Value) {
    app.post(&format!("/api/v1/practice/{}/finish", session_id), token, json!({}))
        .await
}

#[tokio::test]
async fn test_random_practice_gives_immediate_feedback() {
    let app = create_test_app().await;
    app.seed_questions("math", 12).await;
    let token = app.student("student", None).await;

    let session = start(
        &app,
        &token,
        json!({ "mode": "random", "subject": "math", "limit": 5 }),
    )
    .await;
    let id = session["id"].as_str().unwrap();
    assert_eq!(session["questions"].as_array().unwrap().len(), 5);
    assert!(session["questions"][0].get("correct_index").is_none());
    assert!(session["deadline"].is_null());

    let (status, body) = answer(&app, &token, id, 0, 0).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["correct"], true);
    assert_eq!(body["correct_index"], 0);
    assert_eq!(body["answered"], 1);

    let (status, _) = answer(&app, &token, id, 0, 1).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = answer(&app, &token, id, 1, 2).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["correct"], false);

    let (status, _) = answer(&app, &token, id, 9, 0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = answer(&app, &token, id, 2, 4).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, summary) = finish(&app, &token, id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["score"], 1);
    assert_eq!(summary["total"], 5);
    assert_eq!(summary["answered"], 2);
    assert_eq!(summary["items"].as_array().unwrap().len(), 5);

    let (status, _) = finish(&app, &token, id).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = answer(&app, &token, id, 3, 0).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_training_follows_question_order() {
    let app = create_test_app().await;
    app.seed_questions("math", 8).await;
    let token = app.student("student", None).await;

    let session = start(
        &app,
        &token,
        json!({ "mode": "training", "subject": "math", "from": 3, "to": 6 }),
    )
    .await;
    let numbers: Vec<u64> = session["questions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["number"].as_u64().unwrap())
        .collect();
    assert_eq!(numbers, vec![3, 4, 5, 6]);
}

#[tokio::test]
async fn test_empty_topic_is_rejected() {
    let app = create_test_app().await;
    app.seed_questions("math", 3).await;
    let token = app.student("student", None).await;

    let (status, _) = app
        .post("/api/v1/practice", &token, json!({ "mode": "random", "subject": "biology" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/api/v1/practice", &token, json!({ "mode": "mistakes" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/api/v1/practice", &token, json!({ "mode": "scheduled" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_wrong_answers_feed_mistakes_mode() {
    let app = create_test_app().await;
    app.seed_questions("math", 6).await;
    let token = app.student("student", None).await;

    let session = start(&app, &token, json!({ "mode": "training", "subject": "math" })).await;
    let id = session["id"].as_str().unwrap();
    answer(&app, &token, id, 0, 1).await;
    answer(&app, &token, id, 1, 3).await;
    answer(&app, &token, id, 2, 0).await;
    finish(&app, &token, id).await;

    let (status, mistakes) = app.get("/api/v1/me/mistakes", &token).await;
    assert_eq!(status, StatusCode::OK);
    let mistakes = mistakes.as_array().unwrap();
    assert_eq!(mistakes.len(), 2);
    assert_eq!(mistakes[0]["count"], 1);
    assert!(mistakes[0]["text"].as_str().is_some());

    let retry = start(&app, &token, json!({ "mode": "mistakes" })).await;
    let retry_id = retry["id"].as_str().unwrap();
    assert_eq!(retry["questions"].as_array().unwrap().len(), 2);

    let (status, body) = answer(&app, &token, retry_id, 0, 0).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["correct"], true);

    let (_, mistakes) = app.get("/api/v1/me/mistakes", &token).await;
    assert_eq!(mistakes.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_smart_practice_mixes_in_mistakes() {
    let app = create_test_app().await;
    app.seed_questions("math", 30).await;
    let token = app.student("student", None).await;

    let session = start(
        &app,
        &token,
        json!({ "mode": "training", "subject": "math", "limit": 1 }),
    )
    .await;
    let id = session["id"].as_str().unwrap();
    let missed = session["questions"][0]["id"].as_str().unwrap().to_string();
    answer(&app, &token, id, 0, 2).await;

    let smart = start(
        &app,
        &token,
        json!({ "mode": "smart", "subject": "math", "limit": 10 }),
    )
    .await;
    let ids: Vec<&str> = smart["questions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids.len(), 10);
    assert!(ids.contains(&missed.as_str()));
}

#[tokio::test]
async fn test_mock_hides_feedback_and_allows_changes() {
    let app = create_test_app().await;
    app.seed_questions("math", 45).await;
    let token = app.student("student", None).await;

    let session = start(&app, &token, json!({ "mode": "mock" })).await;
    let id = session["id"].as_str().unwrap();
    assert_eq!(session["questions"].as_array().unwrap().len(), 40);
    assert!(session["deadline"].as_str().is_some());
    assert!(session["remaining_seconds"].as_i64().unwrap() > 0);

    let (status, body) = answer(&app, &token, id, 0, 1).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("correct").is_none());
    assert!(body.get("correct_index").is_none());

    let (status, _) = answer(&app, &token, id, 0, 0).await;
    assert_eq!(status, StatusCode::OK);
    answer(&app, &token, id, 1, 3).await;

    let (_, mistakes) = app.get("/api/v1/me/mistakes", &token).await;
    assert!(mistakes.as_array().unwrap().is_empty());

    let (status, summary) = finish(&app, &token, id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["score"], 1);
    assert_eq!(summary["total"], 40);
    assert_eq!(summary["answered"], 2);

    let (_, mistakes) = app.get("/api/v1/me/mistakes", &token).await;
    assert_eq!(mistakes.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_mock_expires_when_time_is_up() {
    let app = create_test_app_with(|config| config.practice.mock_time_limit_minutes = 0).await;
    app.seed_questions("math", 5).await;
    let token = app.student("student", None).await;

    let session = start(&app, &token, json!({ "mode": "mock" })).await;
    let id = session["id"].as_str().unwrap();

    let (status, body) = answer(&app, &token, id, 0, 0).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["status"], 410);

    let (status, view) = app.get(&format!("/api/v1/practice/{}", id), &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["finished"], true);
    assert_eq!(view["remaining_seconds"], 0);

    let (_, history) = app.get("/api/v1/me/history", &token).await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["mode"], "mock");
    assert_eq!(history[0]["score"], 0);
}

#[tokio::test]
async fn test_custom_set_practice() {
    let app = create_test_app().await;
    let token = app.student("student", None).await;

    let (status, session) = app
        .post(
            "/api/v1/practice/custom",
            &token,
            json!({
                "title": "Capitals",
                "questions": [
                    {
                        "text": "Capital of France?",
                        "options": ["Paris", "Rome"],
                        "correct_index": 0
                    },
                    {
                        "text": "Capital of Spain?",
                        "options": ["Lisbon", "Madrid", "Porto"],
                        "correct_index": 1
                    }
                ]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(session["mode"], "custom");
    assert_eq!(session["title"], "Capitals");
    let id = session["id"].as_str().unwrap();

    let (_, body) = answer(&app, &token, id, 1, 0).await;
    assert_eq!(body["correct"], false);
    assert_eq!(body["correct_index"], 1);

    let (_, summary) = finish(&app, &token, id).await;
    assert_eq!(summary["score"], 0);
    assert_eq!(summary["total"], 2);

    let (_, mistakes) = app.get("/api/v1/me/mistakes", &token).await;
    assert!(mistakes.as_array().unwrap().is_empty());

    let (status, _) = app
        .post(
            "/api/v1/practice/custom",
            &token,
            json!({ "title": "Broken", "questions": [
                { "text": "Only one option", "options": ["a"], "correct_index": 0 }
            ]}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sessions_are_private() {
    let app = create_test_app().await;
    app.seed_questions("math", 3).await;
    let owner = app.student("owner", None).await;
    let other = app.student("other", None).await;

    let session = start(&app, &owner, json!({ "mode": "random" })).await;
    let id = session["id"].as_str().unwrap();

    let (status, _) = app.get(&format!("/api/v1/practice/{}", id), &other).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = answer(&app, &other, id, 0, 0).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.get("/api/v1/practice/does-not-exist", &owner).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

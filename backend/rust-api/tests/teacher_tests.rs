use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::json;

mod common;

use common::create_test_app;

#[tokio::test]
async fn test_schedule_crud() {
    let app = create_test_app().await;
    let teacher = app.teacher("teacher").await;
    let now = Utc::now();

    let (status, created) = app
        .post(
            "/api/v1/teacher/tests",
            &teacher,
            json!({
                "title": "  Week 3 quiz ",
                "subject": "chemistry",
                "number_from": 1,
                "number_to": 20,
                "question_count": 10,
                "time_limit_minutes": 15,
                "opens_at": now,
                "closes_at": now + Duration::days(1),
                "class_name": "  ",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["title"], "Week 3 quiz");
    assert!(created["class_name"].is_null());
    let id = created["id"].as_str().unwrap().to_string();

    let (status, listed) = app.get("/api/v1/teacher/tests", &teacher).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, updated) = app
        .request(
            "PUT",
            &format!("/api/v1/teacher/tests/{}", id),
            Some(&teacher),
            Some(json!({
                "title": "Week 3 quiz (retake)",
                "subject": "chemistry",
                "number_from": 5,
                "number_to": 20,
                "question_count": 8,
                "time_limit_minutes": 25,
                "opens_at": now,
                "closes_at": now + Duration::days(2),
                "class_name": "11C",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["time_limit_minutes"], 25);
    assert_eq!(updated["class_name"], "11C");

    let (_, fetched) = app
        .get(&format!("/api/v1/teacher/tests/{}", id), &teacher)
        .await;
    assert_eq!(fetched["title"], "Week 3 quiz (retake)");
    assert_eq!(fetched["number_from"], 5);

    let (status, _) = app
        .request("DELETE", &format!("/api/v1/teacher/tests/{}", id), Some(&teacher), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .get(&format!("/api/v1/teacher/tests/{}", id), &teacher)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request("DELETE", &format!("/api/v1/teacher/tests/{}", id), Some(&teacher), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_schedule_validation() {
    let app = create_test_app().await;
    let teacher = app.teacher("teacher").await;
    let now = Utc::now();

    let (status, _) = app
        .post(
            "/api/v1/teacher/tests",
            &teacher,
            json!({
                "title": "Backwards",
                "subject": "chemistry",
                "number_from": 1,
                "number_to": 20,
                "question_count": 10,
                "time_limit_minutes": 15,
                "opens_at": now,
                "closes_at": now - Duration::hours(1),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            "/api/v1/teacher/tests",
            &teacher,
            json!({
                "title": "No questions",
                "subject": "chemistry",
                "number_from": 1,
                "number_to": 20,
                "question_count": 0,
                "time_limit_minutes": 15,
                "opens_at": now,
                "closes_at": now + Duration::hours(1),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_results_and_reset() {
    let app = create_test_app().await;
    app.seed_questions("chemistry", 5).await;
    let teacher = app.teacher("teacher").await;
    let zoe = app.student("Zoe", None).await;
    let adam = app.student("adam", None).await;
    let test = app.schedule_open_test(&teacher, "chemistry", 2, None).await;
    let test_id = test["id"].as_str().unwrap();
    let start_uri = format!("/api/v1/exams/{}/start", test_id);

    let (_, zoe_attempt) = app.post(&start_uri, &zoe, json!({})).await;
    let zoe_attempt_id = zoe_attempt["id"].as_str().unwrap().to_string();
    app.post(
        &format!("/api/v1/exams/attempts/{}/submit", zoe_attempt_id),
        &zoe,
        json!({}),
    )
    .await;
    app.post(&start_uri, &adam, json!({})).await;

    let results_uri = format!("/api/v1/teacher/tests/{}/results", test_id);
    let (status, results) = app.get(&results_uri, &teacher).await;
    assert_eq!(status, StatusCode::OK);
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["username"], "adam");
    assert_eq!(results[0]["status"], "running");
    assert!(results[0]["score"].is_null());
    assert_eq!(results[1]["username"], "Zoe");
    assert_eq!(results[1]["score"], 0);
    assert_eq!(results[1]["percentage"], 0.0);

    let (status, _) = app
        .request(
            "DELETE",
            &format!("{}/{}", results_uri, zoe_attempt_id),
            Some(&teacher),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, retake) = app.post(&start_uri, &zoe, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(retake["id"], zoe_attempt_id.as_str());

    let (status, _) = app
        .request(
            "DELETE",
            &format!("{}/{}", results_uri, zoe_attempt_id),
            Some(&teacher),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deleting_a_test_removes_attempts() {
    let app = create_test_app().await;
    app.seed_questions("chemistry", 5).await;
    let teacher = app.teacher("teacher").await;
    let student = app.student("student", None).await;
    let test = app.schedule_open_test(&teacher, "chemistry", 2, None).await;
    let test_id = test["id"].as_str().unwrap();

    let (_, attempt) = app
        .post(&format!("/api/v1/exams/{}/start", test_id), &student, json!({}))
        .await;
    let attempt_id = attempt["id"].as_str().unwrap();

    app.request(
        "DELETE",
        &format!("/api/v1/teacher/tests/{}", test_id),
        Some(&teacher),
        None,
    )
    .await;

    let (status, _) = app
        .get(&format!("/api/v1/exams/attempts/{}", attempt_id), &student)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, listed) = app.get("/api/v1/exams", &student).await;
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_students_overview() {
    let app = create_test_app().await;
    app.seed_questions("chemistry", 4).await;
    let teacher = app.teacher("teacher").await;
    let ann = app.student("ann", Some("9A")).await;
    app.student("ben", Some("9b")).await;
    app.student("cat", Some("9A")).await;

    let (_, session) = app
        .post("/api/v1/practice", &ann, json!({ "mode": "training" }))
        .await;
    let session_id = session["id"].as_str().unwrap();
    app.post(
        &format!("/api/v1/practice/{}/answers", session_id),
        &ann,
        json!({ "question_index": 0, "option_index": 0 }),
    )
    .await;
    app.post(&format!("/api/v1/practice/{}/finish", session_id), &ann, json!({}))
        .await;

    let (status, all) = app.get("/api/v1/teacher/students", &teacher).await;
    assert_eq!(status, StatusCode::OK);
    let all = all.as_array().unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|s| s["username"] != "teacher"));

    let (_, class_a) = app.get("/api/v1/teacher/students?class=9a", &teacher).await;
    let class_a = class_a.as_array().unwrap();
    assert_eq!(class_a.len(), 2);
    assert_eq!(class_a[0]["username"], "ann");
    assert_eq!(class_a[0]["sessions"], 1);
    assert_eq!(class_a[0]["total_questions"], 1);
    assert_eq!(class_a[0]["average_percentage"], 25.0);
    assert!(class_a[1]["average_percentage"].is_null());

    let (_, class_b) = app.get("/api/v1/teacher/students?class=9B", &teacher).await;
    assert_eq!(class_b.as_array().unwrap().len(), 1);
}

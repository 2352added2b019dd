#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body, BodyDataStream},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use futures::StreamExt;
use quizdeck_api::{
    config::Config,
    create_router,
    models::{question::QuestionInput, Question},
    services::AppState,
    store::{MemoryStore, SharedStore},
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const TEACHER_CODE: &str = "teach-123";
pub const PASSWORD: &str = "password123";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(|_| {}).await
}

/// Builds the app on a fresh in-memory store after letting the caller tweak the config.
pub async fn create_test_app_with(customize: impl FnOnce(&mut Config)) -> TestApp {
    create_test_app_on(Arc::new(MemoryStore::new()), customize).await
}

pub async fn create_test_app_on(
    store: SharedStore,
    customize: impl FnOnce(&mut Config),
) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let mut config = Config::default();
    config.auth.teacher_code = Some(TEACHER_CODE.to_string());
    config.auth.bcrypt_cost = 4;
    customize(&mut config);

    let state = Arc::new(
        AppState::new(config, store)
            .await
            .expect("Failed to initialize test app state"),
    );

    TestApp {
        router: create_router(state.clone()),
        state,
    }
}

/// Server-sent events read from a live response body.
pub struct EventStream {
    body: BodyDataStream,
    buffer: String,
}

impl EventStream {
    /// Next `(event name, data)` frame, or None once the server closes the stream.
    pub async fn next_event(&mut self) -> Option<(String, Value)> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..end + 2).collect();
                let mut name = String::new();
                let mut data = String::new();
                for line in frame.lines() {
                    if let Some(value) = line.strip_prefix("event:") {
                        name = value.trim().to_string();
                    } else if let Some(value) = line.strip_prefix("data:") {
                        data.push_str(value.trim());
                    }
                }
                if name.is_empty() && data.is_empty() {
                    continue;
                }
                return Some((name, serde_json::from_str(&data).unwrap_or(Value::Null)));
            }

            let chunk = tokio::time::timeout(Duration::from_secs(5), self.body.next())
                .await
                .expect("timed out waiting for a server-sent event")?;
            self.buffer
                .push_str(&String::from_utf8_lossy(&chunk.expect("stream body error")));
        }
    }
}

impl TestApp {
    /// Opens an SSE endpoint and keeps the body streaming.
    pub async fn open_stream(&self, uri: &str, token: &str) -> (StatusCode, EventStream) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let stream = EventStream {
            body: response.into_body().into_data_stream(),
            buffer: String::new(),
        };
        (status, stream)
    }

    /// Sends a JSON request and returns the status with the parsed body (Null when empty).
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).to_string()))
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request("GET", uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request("POST", uri, Some(token), Some(body)).await
    }

    pub async fn register(
        &self,
        username: &str,
        class_name: Option<&str>,
        teacher_code: Option<&str>,
    ) -> (StatusCode, Value) {
        self.request(
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({
                "username": username,
                "password": PASSWORD,
                "class_name": class_name,
                "teacher_code": teacher_code,
            })),
        )
        .await
    }

    /// Registers a student and returns its access token.
    pub async fn student(&self, username: &str, class_name: Option<&str>) -> String {
        let (status, body) = self.register(username, class_name, None).await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        body["access_token"].as_str().unwrap().to_string()
    }

    pub async fn teacher(&self, username: &str) -> String {
        let (status, body) = self.register(username, None, Some(TEACHER_CODE)).await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        body["access_token"].as_str().unwrap().to_string()
    }

    pub async fn login(&self, username: &str) -> (StatusCode, Value) {
        self.request(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": username, "password": PASSWORD })),
        )
        .await
    }

    /// Adds `count` four-option questions numbered 1..=count; option 0 is correct.
    pub async fn seed_questions(&self, subject: &str, count: u32) -> Vec<Question> {
        let mut seeded = Vec::new();
        for number in 1..=count {
            let question = self
                .state
                .questions
                .create(QuestionInput {
                    subject: subject.to_string(),
                    number,
                    text: format!("{} question {}", subject, number),
                    options: vec![
                        "right".to_string(),
                        "wrong a".to_string(),
                        "wrong b".to_string(),
                        "wrong c".to_string(),
                    ],
                    correct_index: 0,
                    image: None,
                    active: true,
                })
                .await
                .unwrap();
            seeded.push(question);
        }
        seeded
    }

    /// Schedules a test that is open right now.
    pub async fn schedule_open_test(
        &self,
        teacher_token: &str,
        subject: &str,
        question_count: usize,
        class_name: Option<&str>,
    ) -> Value {
        let now = Utc::now();
        let (status, body) = self
            .post(
                "/api/v1/teacher/tests",
                teacher_token,
                json!({
                    "title": format!("{} check", subject),
                    "subject": subject,
                    "number_from": 1,
                    "number_to": 100,
                    "question_count": question_count,
                    "time_limit_minutes": 20,
                    "opens_at": now - chrono::Duration::minutes(5),
                    "closes_at": now + chrono::Duration::hours(1),
                    "class_name": class_name,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create test failed: {}", body);
        body
    }
}

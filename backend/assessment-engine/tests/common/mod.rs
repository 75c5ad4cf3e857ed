#![allow(dead_code)]

use assessment_engine::{
    config::Config,
    create_router,
    models::{Question, QuestionRequest, QuestionSource},
    services::{
        question_provider::QuestionProvider,
        response_store::{InMemoryResponseStore, ResponseStore},
        AppState,
    },
    EngineError,
};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

/// Generates distinct questions whose correct answer is always "A".
pub struct ScriptedProvider {
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl QuestionProvider for ScriptedProvider {
    async fn get_next_question(&self, req: &QuestionRequest) -> Result<Question, EngineError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Question {
            id: format!("generated-{}", n),
            text: format!("{} question #{} (level {})", req.subtag, n, req.difficulty),
            options: BTreeMap::from([
                ("A".to_string(), "right".to_string()),
                ("B".to_string(), "wrong".to_string()),
            ]),
            correct_answer: "A".to_string(),
            explanation: None,
            subtag: req.subtag,
            difficulty: req.difficulty,
            source: QuestionSource::Provider,
        })
    }
}

pub struct OfflineProvider;

#[async_trait]
impl QuestionProvider for OfflineProvider {
    async fn get_next_question(&self, _req: &QuestionRequest) -> Result<Question, EngineError> {
        Err(EngineError::ProviderFailure("connection refused".to_string()))
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<InMemoryResponseStore>,
}

pub fn create_test_app_with(provider: Arc<dyn QuestionProvider>) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let mut config = Config::in_memory();
    config.engine.adaptive.rng_seed = Some(7);
    config.question_provider_timeout_ms = 200;

    let store = Arc::new(InMemoryResponseStore::new());
    let state = Arc::new(
        AppState::with_components(config, store.clone() as Arc<dyn ResponseStore>, provider)
            .expect("Failed to initialize test app state"),
    );

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
    }
}

pub fn create_test_app() -> TestApp {
    create_test_app_with(Arc::new(ScriptedProvider::new()))
}

pub async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => builder.body(Body::from(serde_json::to_string(&body).unwrap())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into()));
    (status, json)
}

pub async fn start_section(
    app: &Router,
    attempt_id: &str,
    section_id: &str,
    subtags: serde_json::Value,
) -> serde_json::Value {
    let (status, body) = send_json(
        app,
        "POST",
        "/api/v1/attempts",
        Some(serde_json::json!({
            "attempt_id": attempt_id,
            "student_id": "student-42",
            "grade_level": "high_school",
            "section_id": section_id,
            "subtags": subtags,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "start failed: {}", body);
    body
}

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use moco_api::{
    config::Config,
    create_router,
    models::{ChallengeInfo, Prompt},
    services::{
        chat_engine::ChatSessionEngine,
        engine_settings,
        memory_store::{InMemoryChallengeLookup, InMemorySessionStore},
        ports::{GenerationError, TextGenerator},
        AppState,
    },
};
use tower::ServiceExt;

pub const CHALLENGE_ID: &str = "two-sum";
const SCORING_MARKER: &str = "Respond with only a number between 0 and 100.";

/// Tutor double: numbered hints for tutoring prompts, a fixed sentence for
/// scoring prompts, and a switch to make tutoring calls fail.
#[derive(Default)]
pub struct ScriptedGenerator {
    pub tutoring_calls: AtomicUsize,
    pub scoring_calls: AtomicUsize,
    pub fail_tutoring: AtomicBool,
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let text = &prompt.blocks[0].content;
        if text.ends_with(SCORING_MARKER) {
            self.scoring_calls.fetch_add(1, Ordering::SeqCst);
            return Ok("I'd rate this 83 out of 100.".to_string());
        }

        let n = self.tutoring_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_tutoring.load(Ordering::SeqCst) {
            return Err(GenerationError::Transport("connection refused".to_string()));
        }
        Ok(format!("Hint #{}: what would a hash map give you?", n))
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemorySessionStore>,
    pub generator: Arc<ScriptedGenerator>,
}

pub fn create_test_app() -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let config = Config::default();
    let challenges = Arc::new(InMemoryChallengeLookup::with_challenges([ChallengeInfo {
        id: CHALLENGE_ID.to_string(),
        title: "Two Sum".to_string(),
        description: "Given an array of integers and a target, return the indices of the two \
                      numbers that add up to the target."
            .to_string(),
    }]));
    let store = Arc::new(InMemorySessionStore::new());
    let generator = Arc::new(ScriptedGenerator::default());

    let engine = ChatSessionEngine::new(
        challenges,
        store.clone(),
        generator.clone(),
        engine_settings(&config),
    );
    let state = Arc::new(AppState::with_engine(config, engine));

    TestApp {
        router: create_router(state),
        store,
        generator,
    }
}

impl TestApp {
    pub async fn post_chat(
        &self,
        challenge_id: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/v1/challenges/{}/chat", challenge_id))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }
}

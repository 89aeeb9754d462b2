use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use prometheus::IntGauge;
use thiserror::Error;

use crate::metrics::{
    CHAT_SESSIONS_COMPLETED_TOTAL, CHAT_TURNS_IN_FLIGHT, CHAT_TURNS_TOTAL,
    GENERATION_DURATION_SECONDS, GENERATION_REQUESTS_TOTAL,
};
use crate::models::{
    ChallengeInfo, ChatSession, Message, Prompt, SessionKey, SessionSnapshot,
    DEFAULT_MAX_INTERACTIONS,
};

use super::ports::{ChallengeLookup, GenerationError, SessionStore, StoreError, TextGenerator};
use super::prompt_builder::{PromptBuilder, DEFAULT_RESPONSE_LANGUAGE};
use super::scoring::ScoringStrategy;
use super::session_lock::TurnLocks;

/// Assistant message used whenever the tutor reply cannot be generated.
pub const FALLBACK_REPLY: &str =
    "Sorry, a temporary error occurred while preparing a response. Please try again.";

pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Message must not be empty")]
    EmptyMessage,
    #[error("Challenge not found with ID: {0}")]
    ChallengeNotFound(String),
    #[error("Maximum interactions reached for this session ({max_interactions})")]
    SessionExhausted {
        session_id: String,
        max_interactions: u32,
    },
    #[error("Session was modified by a concurrent request; retry the message")]
    ConcurrentModification,
    #[error("Storage failure: {0}")]
    Storage(anyhow::Error),
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { .. } => ChatError::ConcurrentModification,
            StoreError::Backend(e) => ChatError::Storage(e),
        }
    }
}

impl ChatError {
    fn outcome_label(&self) -> &'static str {
        match self {
            ChatError::EmptyMessage => "empty_message",
            ChatError::ChallengeNotFound(_) => "challenge_not_found",
            ChatError::SessionExhausted { .. } => "exhausted",
            ChatError::ConcurrentModification => "conflict",
            ChatError::Storage(_) => "storage_error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_interactions: u32,
    pub generation_timeout: Duration,
    pub response_language: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_interactions: DEFAULT_MAX_INTERACTIONS,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            response_language: DEFAULT_RESPONSE_LANGUAGE.to_string(),
        }
    }
}

/// Holds a gauge raised until dropped, so a cancelled turn still lowers it.
struct GaugeGuard<'a>(&'a IntGauge);

impl<'a> GaugeGuard<'a> {
    fn raise(gauge: &'a IntGauge) -> Self {
        gauge.inc();
        Self(gauge)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Runs bounded tutoring conversations: one session per (challenge, user),
/// one user and one assistant message per accepted turn, and a single
/// understanding score once the last turn is taken.
pub struct ChatSessionEngine {
    challenges: Arc<dyn ChallengeLookup>,
    sessions: Arc<dyn SessionStore>,
    generator: Arc<dyn TextGenerator>,
    prompts: PromptBuilder,
    scoring: ScoringStrategy,
    locks: TurnLocks,
    settings: EngineSettings,
}

impl ChatSessionEngine {
    pub fn new(
        challenges: Arc<dyn ChallengeLookup>,
        sessions: Arc<dyn SessionStore>,
        generator: Arc<dyn TextGenerator>,
        settings: EngineSettings,
    ) -> Self {
        let prompts = PromptBuilder::new(settings.response_language.clone());
        let scoring = ScoringStrategy::new(
            generator.clone(),
            prompts.clone(),
            settings.generation_timeout,
        );

        Self {
            challenges,
            sessions,
            generator,
            prompts,
            scoring,
            locks: TurnLocks::new(),
            settings,
        }
    }

    pub async fn process_turn(
        &self,
        challenge_id: &str,
        user_id: &str,
        user_text: &str,
    ) -> Result<SessionSnapshot, ChatError> {
        let in_flight = GaugeGuard::raise(&CHAT_TURNS_IN_FLIGHT);
        let result = self.process_turn_inner(challenge_id, user_id, user_text).await;
        drop(in_flight);

        let outcome = match &result {
            Ok(_) => "accepted",
            Err(e) => e.outcome_label(),
        };
        CHAT_TURNS_TOTAL.with_label_values(&[outcome]).inc();

        result
    }

    async fn process_turn_inner(
        &self,
        challenge_id: &str,
        user_id: &str,
        user_text: &str,
    ) -> Result<SessionSnapshot, ChatError> {
        if user_text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let challenge = self
            .challenges
            .find(challenge_id)
            .await
            .map_err(ChatError::Storage)?
            .ok_or_else(|| ChatError::ChallengeNotFound(challenge_id.to_string()))?;

        let key = SessionKey::new(challenge_id, user_id);
        let _turn = self.locks.acquire(&key).await;

        let mut session = match self
            .sessions
            .find_by_challenge_and_user(challenge_id, user_id)
            .await
            .map_err(ChatError::Storage)?
        {
            Some(session) => session,
            None => {
                tracing::info!("Starting chat session for key={}", key);
                ChatSession::start(&key, self.settings.max_interactions, Utc::now())
            }
        };

        if session.is_exhausted() {
            tracing::info!(
                "Rejecting turn for exhausted session={} ({} of {})",
                session.id,
                session.interaction_count,
                session.max_interactions
            );
            return Err(ChatError::SessionExhausted {
                session_id: session.id,
                max_interactions: session.max_interactions,
            });
        }

        session.interaction_count += 1;
        session.messages.push(Message::user(user_text, Utc::now()));

        let reply = self.tutor_reply(&challenge, &session).await;
        let now = Utc::now();
        session.messages.push(Message::assistant(reply, now));
        session.updated_at = now;

        if session.interaction_count == session.max_interactions
            && session.understanding_score.is_none()
        {
            let score = self.scoring.score(&session.messages).await;
            session.understanding_score = Some(score);
            CHAT_SESSIONS_COMPLETED_TOTAL.inc();
            tracing::info!("Session {} completed with understanding score {}", session.id, score);
        }

        let saved = self.sessions.save(session).await.map_err(|e| {
            match &e {
                StoreError::VersionConflict { session_id, expected } => tracing::warn!(
                    "Stale write for session={} (expected version {})",
                    session_id,
                    expected
                ),
                StoreError::Backend(err) => {
                    tracing::error!("Failed to persist session for key={}: {:#}", key, err)
                }
            }
            ChatError::from(e)
        })?;

        tracing::info!(
            "Turn accepted: session={}, interaction={}/{}, version={}",
            saved.id,
            saved.interaction_count,
            saved.max_interactions,
            saved.version
        );

        Ok(saved.snapshot())
    }

    pub async fn get_session(
        &self,
        challenge_id: &str,
        user_id: &str,
    ) -> Result<SessionSnapshot, ChatError> {
        let key = SessionKey::new(challenge_id, user_id);
        let session = self
            .sessions
            .find_by_challenge_and_user(challenge_id, user_id)
            .await
            .map_err(ChatError::Storage)?;

        Ok(match session {
            Some(session) => session.snapshot(),
            None => SessionSnapshot::empty(&key, self.settings.max_interactions, Utc::now()),
        })
    }

    pub async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<SessionSnapshot>, ChatError> {
        let sessions = self
            .sessions
            .find_by_user(user_id)
            .await
            .map_err(ChatError::Storage)?;

        Ok(sessions.iter().map(ChatSession::snapshot).collect())
    }

    async fn tutor_reply(&self, challenge: &ChallengeInfo, session: &ChatSession) -> String {
        let prompt = self.prompts.tutoring_prompt(challenge, &session.messages);
        let start = Instant::now();
        let result = self.generate_with_timeout(&prompt).await;

        GENERATION_DURATION_SECONDS
            .with_label_values(&["tutoring"])
            .observe(start.elapsed().as_secs_f64());

        match result {
            Ok(reply) => {
                GENERATION_REQUESTS_TOTAL
                    .with_label_values(&["tutoring", "success"])
                    .inc();
                reply
            }
            Err(e) => {
                GENERATION_REQUESTS_TOTAL
                    .with_label_values(&["tutoring", "failure"])
                    .inc();
                tracing::warn!(
                    "Tutor generation failed for session={}, using fallback reply: {}",
                    session.id,
                    e
                );
                FALLBACK_REPLY.to_string()
            }
        }
    }

    async fn generate_with_timeout(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let timeout = self.settings.generation_timeout;
        let reply = tokio::time::timeout(timeout, self.generator.generate(prompt))
            .await
            .map_err(|_| GenerationError::Timeout(timeout))??;

        if reply.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(reply)
    }
}

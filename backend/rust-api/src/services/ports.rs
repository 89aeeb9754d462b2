//! Seams between the chat engine and the outside world.
//!
//! Mongo, Redis and HTTP implementations live next to this module; in-memory
//! implementations back the tests and local runs without a database.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ChallengeInfo, ChatSession, Prompt};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("text generation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("text generation returned an empty response")]
    EmptyResponse,
    #[error("text generation backend returned status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("failed to decode text generation response: {0}")]
    Decode(String),
    #[error("text generation transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored session moved past the version the caller read.
    #[error("session {session_id} was modified concurrently (expected version {expected})")]
    VersionConflict { session_id: String, expected: u64 },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait ChallengeLookup: Send + Sync {
    async fn find(&self, challenge_id: &str) -> anyhow::Result<Option<ChallengeInfo>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_by_challenge_and_user(
        &self,
        challenge_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Option<ChatSession>>;

    async fn find_by_id(&self, session_id: &str) -> anyhow::Result<Option<ChatSession>>;

    /// Sessions of one user, most recently updated first.
    async fn find_by_user(&self, user_id: &str) -> anyhow::Result<Vec<ChatSession>>;

    /// Upsert keyed by `session.id`.
    ///
    /// `session.version` must equal the stored version (0 for a session that
    /// was never saved). Returns the stored session with its version bumped.
    async fn save(&self, session: ChatSession) -> Result<ChatSession, StoreError>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError>;
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_MAX_INTERACTIONS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            content: content.into(),
            sender: Sender::User,
            timestamp,
        }
    }

    pub fn assistant(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            content: content.into(),
            sender: Sender::Assistant,
            timestamp,
        }
    }
}

/// Composite key identifying the single session a user holds for a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub challenge_id: String,
    pub user_id: String,
}

impl SessionKey {
    pub fn new(challenge_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            challenge_id: challenge_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.challenge_id, self.user_id)
    }
}

/// Tutoring conversation between one user and one challenge.
///
/// `version` is 0 until the first successful save and is bumped by the store
/// on every write; a save carrying a stale version is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub challenge_id: String,
    pub user_id: String,
    pub messages: Vec<Message>,
    pub interaction_count: u32,
    pub max_interactions: u32,
    pub understanding_score: Option<u8>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn start(key: &SessionKey, max_interactions: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            challenge_id: key.challenge_id.clone(),
            user_id: key.user_id.clone(),
            messages: Vec::new(),
            interaction_count: 0,
            max_interactions,
            understanding_score: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.interaction_count >= self.max_interactions
    }

    pub fn remaining_interactions(&self) -> u32 {
        self.max_interactions.saturating_sub(self.interaction_count)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            challenge_id: self.challenge_id.clone(),
            user_id: self.user_id.clone(),
            messages: self.messages.clone(),
            understanding_score: self.understanding_score,
            remaining_interactions: self.remaining_interactions(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Read-only view of a session handed back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub challenge_id: String,
    pub user_id: String,
    pub messages: Vec<Message>,
    pub understanding_score: Option<u8>,
    pub remaining_interactions: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Snapshot returned when a user has not talked about a challenge yet.
    pub fn empty(key: &SessionKey, max_interactions: u32, now: DateTime<Utc>) -> Self {
        Self {
            session_id: String::new(),
            challenge_id: key.challenge_id.clone(),
            user_id: key.user_id.clone(),
            messages: Vec::new(),
            understanding_score: None,
            remaining_interactions: max_interactions,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_has_full_budget() {
        let key = SessionKey::new("challenge-1", "user-1");
        let session = ChatSession::start(&key, DEFAULT_MAX_INTERACTIONS, Utc::now());

        assert!(!session.id.is_empty());
        assert_eq!(session.remaining_interactions(), 5);
        assert!(!session.is_exhausted());
        assert_eq!(session.version, 0);
        assert_eq!(session.challenge_id, key.challenge_id);
        assert_eq!(session.user_id, key.user_id);
    }

    #[test]
    fn remaining_interactions_never_underflows() {
        let key = SessionKey::new("challenge-1", "user-1");
        let mut session = ChatSession::start(&key, 2, Utc::now());
        session.interaction_count = 2;

        assert!(session.is_exhausted());
        assert_eq!(session.remaining_interactions(), 0);
        assert_eq!(session.snapshot().remaining_interactions, 0);
    }

    #[test]
    fn sender_serializes_as_snake_case() {
        let json = serde_json::to_string(&Sender::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        assert_eq!(Sender::User.to_string(), "user");
    }
}

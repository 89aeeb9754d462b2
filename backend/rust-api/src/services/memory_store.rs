//! In-process adapters with the same contract as the Mongo ones.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{ChallengeInfo, ChatSession};

use super::ports::{ChallengeLookup, SessionStore, StoreError};

#[derive(Default)]
pub struct InMemoryChallengeLookup {
    challenges: RwLock<HashMap<String, ChallengeInfo>>,
}

impl InMemoryChallengeLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_challenges(challenges: impl IntoIterator<Item = ChallengeInfo>) -> Self {
        let map = challenges
            .into_iter()
            .map(|challenge| (challenge.id.clone(), challenge))
            .collect();
        Self {
            challenges: RwLock::new(map),
        }
    }

    pub async fn insert(&self, challenge: ChallengeInfo) {
        self.challenges
            .write()
            .await
            .insert(challenge.id.clone(), challenge);
    }
}

#[async_trait]
impl ChallengeLookup for InMemoryChallengeLookup {
    async fn find(&self, challenge_id: &str) -> anyhow::Result<Option<ChallengeInfo>> {
        Ok(self.challenges.read().await.get(challenge_id).cloned())
    }
}

/// Sessions keyed by id, with the same optimistic version rules as Mongo.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, ChatSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn find_by_challenge_and_user(
        &self,
        challenge_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Option<ChatSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .find(|s| s.challenge_id == challenge_id && s.user_id == user_id)
            .cloned())
    }

    async fn find_by_id(&self, session_id: &str) -> anyhow::Result<Option<ChatSession>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn find_by_user(&self, user_id: &str) -> anyhow::Result<Vec<ChatSession>> {
        let sessions = self.sessions.read().await;
        let mut found: Vec<ChatSession> = sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(found)
    }

    async fn save(&self, mut session: ChatSession) -> Result<ChatSession, StoreError> {
        let mut sessions = self.sessions.write().await;

        let conflict = match sessions.get(&session.id) {
            Some(stored) => stored.version != session.version,
            None => {
                session.version != 0
                    || sessions.values().any(|s| {
                        s.challenge_id == session.challenge_id && s.user_id == session.user_id
                    })
            }
        };

        if conflict {
            return Err(StoreError::VersionConflict {
                session_id: session.id.clone(),
                expected: session.version,
            });
        }

        session.version += 1;
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }
}

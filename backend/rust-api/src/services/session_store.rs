use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::doc,
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
    Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};

use crate::metrics::track_db_operation;
use crate::models::{ChatSession, Message, Sender};
use crate::utils::retry::{retry_async_with_config, RetryConfig};
use crate::utils::time::bson_datetime;

use super::ports::{SessionStore, StoreError};

const COLLECTION: &str = "chat_sessions";
const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageDocument {
    content: String,
    sender: Sender,
    #[serde(with = "bson_datetime")]
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    challenge_id: String,
    user_id: String,
    messages: Vec<MessageDocument>,
    interaction_count: u32,
    max_interactions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    understanding_score: Option<u8>,
    version: i64,
    #[serde(with = "bson_datetime")]
    created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime")]
    updated_at: DateTime<Utc>,
}

impl From<&ChatSession> for ChatSessionDocument {
    fn from(session: &ChatSession) -> Self {
        Self {
            id: session.id.clone(),
            challenge_id: session.challenge_id.clone(),
            user_id: session.user_id.clone(),
            messages: session
                .messages
                .iter()
                .map(|m| MessageDocument {
                    content: m.content.clone(),
                    sender: m.sender,
                    timestamp: m.timestamp,
                })
                .collect(),
            interaction_count: session.interaction_count,
            max_interactions: session.max_interactions,
            understanding_score: session.understanding_score,
            version: session.version as i64,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

impl From<ChatSessionDocument> for ChatSession {
    fn from(doc: ChatSessionDocument) -> Self {
        Self {
            id: doc.id,
            challenge_id: doc.challenge_id,
            user_id: doc.user_id,
            messages: doc
                .messages
                .into_iter()
                .map(|m| Message {
                    content: m.content,
                    sender: m.sender,
                    timestamp: m.timestamp,
                })
                .collect(),
            interaction_count: doc.interaction_count,
            max_interactions: doc.max_interactions,
            understanding_score: doc.understanding_score,
            version: doc.version.max(0) as u64,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

/// Sessions in the `chat_sessions` collection.
///
/// Writes are conditional on the `version` the caller loaded; the unique
/// `(challenge_id, user_id)` index rejects a second first-write for a key.
pub struct MongoSessionStore {
    collection: Collection<ChatSessionDocument>,
    read_retry: RetryConfig,
}

impl MongoSessionStore {
    pub fn new(mongo: &Database) -> Self {
        Self {
            collection: mongo.collection(COLLECTION),
            read_retry: RetryConfig::default(),
        }
    }

    pub async fn ensure_indexes(&self) -> anyhow::Result<()> {
        let unique_key = IndexModel::builder()
            .keys(doc! { "challenge_id": 1, "user_id": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name("challenge_user_unique".to_string())
                    .build(),
            )
            .build();
        let by_user = IndexModel::builder()
            .keys(doc! { "user_id": 1, "updated_at": -1 })
            .build();

        self.collection
            .create_indexes([unique_key, by_user])
            .await
            .context("Failed to create chat_sessions indexes")?;

        tracing::info!("chat_sessions indexes ensured");
        Ok(())
    }

    async fn insert(&self, stored: ChatSession) -> Result<ChatSession, StoreError> {
        let document = ChatSessionDocument::from(&stored);
        let result = track_db_operation("insert_one", COLLECTION, async {
            self.collection
                .insert_one(&document)
                .await
                .map_err(anyhow::Error::from)
        })
        .await;

        match result {
            Ok(_) => Ok(stored),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::VersionConflict {
                session_id: stored.id,
                expected: 0,
            }),
            Err(e) => Err(StoreError::Backend(e.context("Failed to insert chat session"))),
        }
    }

    async fn replace(&self, stored: ChatSession, expected: u64) -> Result<ChatSession, StoreError> {
        let document = ChatSessionDocument::from(&stored);
        let filter = doc! { "_id": &stored.id, "version": expected as i64 };

        let result = track_db_operation("replace_one", COLLECTION, async {
            self.collection
                .replace_one(filter, &document)
                .await
                .map_err(anyhow::Error::from)
        })
        .await
        .map_err(|e| StoreError::Backend(e.context("Failed to update chat session")))?;

        if result.matched_count == 0 {
            return Err(StoreError::VersionConflict {
                session_id: stored.id,
                expected,
            });
        }
        Ok(stored)
    }
}

#[async_trait]
impl SessionStore for MongoSessionStore {
    async fn find_by_challenge_and_user(
        &self,
        challenge_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Option<ChatSession>> {
        let collection = &self.collection;
        let found = retry_async_with_config("find chat session", self.read_retry.clone(), move || {
            track_db_operation("find_one", COLLECTION, async move {
                collection
                    .find_one(doc! { "challenge_id": challenge_id, "user_id": user_id })
                    .await
                    .context("Failed to query chat session")
            })
        })
        .await?;

        Ok(found.map(ChatSession::from))
    }

    async fn find_by_id(&self, session_id: &str) -> anyhow::Result<Option<ChatSession>> {
        let collection = &self.collection;
        let found = retry_async_with_config("find chat session by id", self.read_retry.clone(), move || {
            track_db_operation("find_one", COLLECTION, async move {
                collection
                    .find_one(doc! { "_id": session_id })
                    .await
                    .context("Failed to query chat session by id")
            })
        })
        .await?;

        Ok(found.map(ChatSession::from))
    }

    async fn find_by_user(&self, user_id: &str) -> anyhow::Result<Vec<ChatSession>> {
        let collection = &self.collection;
        let documents: Vec<ChatSessionDocument> =
            retry_async_with_config("find chat sessions for user", self.read_retry.clone(), move || {
                track_db_operation("find", COLLECTION, async move {
                    let cursor = collection
                        .find(doc! { "user_id": user_id })
                        .sort(doc! { "updated_at": -1 })
                        .await
                        .context("Failed to query chat sessions for user")?;
                    cursor
                        .try_collect()
                        .await
                        .context("Failed to iterate chat sessions for user")
                })
            })
            .await?;

        Ok(documents.into_iter().map(ChatSession::from).collect())
    }

    async fn save(&self, session: ChatSession) -> Result<ChatSession, StoreError> {
        let expected = session.version;
        let mut stored = session;
        stored.version = expected + 1;

        if expected == 0 {
            self.insert(stored).await
        } else {
            self.replace(stored, expected).await
        }
    }
}

fn is_duplicate_key(err: &anyhow::Error) -> bool {
    err.downcast_ref::<mongodb::error::Error>()
        .map(|e| {
            matches!(
                *e.kind,
                ErrorKind::Write(WriteFailure::WriteError(ref we)) if we.code == DUPLICATE_KEY_CODE
            )
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionKey;
    use mongodb::bson::{self, Bson};

    #[test]
    fn document_round_trip_keeps_transcript_and_version() {
        let mut session = ChatSession::start(&SessionKey::new("c1", "u1"), 5, Utc::now());
        session.messages.push(Message::user("hi", Utc::now()));
        session.messages.push(Message::assistant("hello", Utc::now()));
        session.interaction_count = 1;
        session.version = 3;

        let bson_doc = bson::to_document(&ChatSessionDocument::from(&session)).unwrap();
        assert_eq!(bson_doc.get_str("_id").unwrap(), session.id);
        assert_eq!(bson_doc.get_i64("version").unwrap(), 3);
        assert!(matches!(bson_doc.get("created_at"), Some(Bson::DateTime(_))));
        assert!(bson_doc.get("understanding_score").is_none());

        let back: ChatSessionDocument = bson::from_document(bson_doc).unwrap();
        let restored = ChatSession::from(back);
        assert_eq!(restored.messages.len(), 2);
        assert_eq!(restored.messages[1].sender, Sender::Assistant);
        assert_eq!(restored.version, 3);
        assert_eq!(restored.understanding_score, None);
    }

    #[test]
    fn non_mongo_errors_are_not_duplicates() {
        assert!(!is_duplicate_key(&anyhow::anyhow!("E11000 duplicate key")));
    }
}

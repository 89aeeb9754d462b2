use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;

use self::challenge_service::{CachedChallengeLookup, MongoChallengeLookup};
use self::chat_engine::{ChatSessionEngine, EngineSettings};
use self::memory_store::{InMemoryChallengeLookup, InMemorySessionStore};
use self::ports::{ChallengeLookup, SessionStore, TextGenerator};
use self::session_store::MongoSessionStore;
use self::text_generation::ChatCompletionsGenerator;

pub mod challenge_service;
pub mod chat_engine;
pub mod memory_store;
pub mod ports;
pub mod prompt_builder;
pub mod scoring;
pub mod session_lock;
pub mod session_store;
pub mod text_generation;

pub struct AppState {
    pub config: Config,
    pub engine: Arc<ChatSessionEngine>,
    /// `None` when sessions are kept in memory.
    pub mongo: Option<Database>,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: Option<MongoClient>,
        redis_client: Option<redis::Client>,
    ) -> anyhow::Result<Self> {
        let generator: Arc<dyn TextGenerator> =
            Arc::new(ChatCompletionsGenerator::new(&config.generation)?);

        let mongo = mongo_client.map(|client| client.database(&config.mongo_database));

        let (challenges, sessions): (Arc<dyn ChallengeLookup>, Arc<dyn SessionStore>) = match &mongo {
            Some(db) => {
                let sessions = MongoSessionStore::new(db);
                sessions.ensure_indexes().await?;
                (Arc::new(MongoChallengeLookup::new(db)), Arc::new(sessions))
            }
            None => {
                tracing::warn!("No MongoDB configured, chat sessions are kept in memory");
                (
                    Arc::new(InMemoryChallengeLookup::new()),
                    Arc::new(InMemorySessionStore::new()),
                )
            }
        };

        let redis = match redis_client {
            Some(client) => Some(connect_redis(client).await?),
            None => None,
        };

        let challenges: Arc<dyn ChallengeLookup> = match &redis {
            Some(conn) => Arc::new(CachedChallengeLookup::new(
                challenges,
                conn.clone(),
                config.challenge_cache_ttl_secs,
            )),
            None => challenges,
        };

        let engine = ChatSessionEngine::new(
            challenges,
            sessions,
            generator,
            engine_settings(&config),
        );

        Ok(Self {
            config,
            engine: Arc::new(engine),
            mongo,
            redis,
        })
    }

    /// State around a prebuilt engine, without external connections.
    pub fn with_engine(config: Config, engine: ChatSessionEngine) -> Self {
        Self {
            config,
            engine: Arc::new(engine),
            mongo: None,
            redis: None,
        }
    }
}

pub fn engine_settings(config: &Config) -> EngineSettings {
    EngineSettings {
        max_interactions: config.chat.max_interactions,
        generation_timeout: Duration::from_secs(config.generation.timeout_secs),
        response_language: config.chat.response_language.clone(),
    }
}

async fn connect_redis(client: redis::Client) -> anyhow::Result<ConnectionManager> {
    tracing::info!("Attempting to connect to Redis...");

    let redis = tokio::time::timeout(Duration::from_secs(30), ConnectionManager::new(client))
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    tracing::info!("Redis ConnectionManager created, testing with PING...");

    let mut conn = redis.clone();
    tokio::time::timeout(
        Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}

use serde::Deserialize;
use std::env;

use crate::models::DEFAULT_MAX_INTERACTIONS;
use crate::services::challenge_service::DEFAULT_CACHE_TTL_SECS;
use crate::services::prompt_builder::DEFAULT_RESPONSE_LANGUAGE;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Without a Mongo URI the service keeps sessions in memory.
    pub mongo_uri: Option<String>,
    pub mongo_database: String,
    /// Without a Redis URI challenge lookups go straight to the store.
    pub redis_uri: Option<String>,
    pub bind_addr: String,
    pub generation: GenerationConfig,
    pub chat: ChatConfig,
    pub challenge_cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    pub max_interactions: u32,
    pub response_language: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 30,
            temperature: 0.7,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_interactions: DEFAULT_MAX_INTERACTIONS,
            response_language: DEFAULT_RESPONSE_LANGUAGE.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongo_uri: None,
            mongo_database: "moco".to_string(),
            redis_uri: None,
            bind_addr: "0.0.0.0:8081".to_string(),
            generation: GenerationConfig::default(),
            chat: ChatConfig::default(),
            challenge_cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/{env}.toml, then APP__SECTION__KEY overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .ok()
            .filter(|uri| !uri.is_empty());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or(defaults.mongo_database);

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .ok()
            .filter(|uri| !uri.is_empty());

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or(defaults.bind_addr);

        let generation = GenerationConfig {
            base_url: settings
                .get_string("generation.base_url")
                .or_else(|_| env::var("OPENAI_BASE_URL"))
                .unwrap_or(defaults.generation.base_url),
            api_key: settings
                .get_string("generation.api_key")
                .or_else(|_| env::var("OPENAI_API_KEY"))
                .ok(),
            model: settings
                .get_string("generation.model")
                .or_else(|_| env::var("OPENAI_MODEL"))
                .unwrap_or(defaults.generation.model),
            timeout_secs: read_u64(&settings, "generation.timeout_secs")?
                .unwrap_or(defaults.generation.timeout_secs),
            temperature: settings
                .get_float("generation.temperature")
                .map(|t| t as f32)
                .unwrap_or(defaults.generation.temperature),
        };

        let max_interactions = read_u64(&settings, "chat.max_interactions")?
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(defaults.chat.max_interactions);
        if max_interactions == 0 {
            return Err(config::ConfigError::Message(
                "chat.max_interactions must be at least 1".to_string(),
            ));
        }

        let chat = ChatConfig {
            max_interactions,
            response_language: settings
                .get_string("chat.response_language")
                .unwrap_or(defaults.chat.response_language),
        };

        let challenge_cache_ttl_secs = read_u64(&settings, "cache.challenge_ttl_secs")?
            .unwrap_or(defaults.challenge_cache_ttl_secs);

        if generation.api_key.is_none() {
            eprintln!("WARNING: No generation API key configured, requests are sent unauthenticated");
        }

        Ok(Config {
            mongo_uri,
            mongo_database,
            redis_uri,
            bind_addr,
            generation,
            chat,
            challenge_cache_ttl_secs,
        })
    }
}

fn read_u64(settings: &config::Config, key: &str) -> Result<Option<u64>, config::ConfigError> {
    match settings.get_int(key) {
        Ok(value) => u64::try_from(value)
            .map(Some)
            .map_err(|_| config::ConfigError::Message(format!("{} must not be negative", key))),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

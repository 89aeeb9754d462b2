use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use mongodb::{
    bson::{doc, oid::ObjectId, Bson, Document},
    Collection, Database,
};
use redis::aio::ConnectionManager;

use crate::metrics::{record_cache_hit, record_cache_miss, track_cache_operation, track_db_operation};
use crate::models::ChallengeInfo;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

use super::ports::ChallengeLookup;

const COLLECTION: &str = "challenges";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 600;

/// Reads challenge metadata from the `challenges` collection. Ids may be
/// stored either as ObjectIds or as plain strings.
pub struct MongoChallengeLookup {
    collection: Collection<Document>,
    read_retry: RetryConfig,
}

impl MongoChallengeLookup {
    pub fn new(mongo: &Database) -> Self {
        Self {
            collection: mongo.collection(COLLECTION),
            read_retry: RetryConfig::default(),
        }
    }
}

#[async_trait]
impl ChallengeLookup for MongoChallengeLookup {
    async fn find(&self, challenge_id: &str) -> anyhow::Result<Option<ChallengeInfo>> {
        let filter = if let Ok(object_id) = ObjectId::parse_str(challenge_id) {
            doc! { "_id": object_id }
        } else {
            doc! { "_id": challenge_id }
        };

        let collection = &self.collection;
        let found = retry_async_with_config("find challenge", self.read_retry.clone(), move || {
            let filter = filter.clone();
            track_db_operation("find_one", COLLECTION, async move {
                collection
                    .find_one(filter)
                    .await
                    .context("Failed to query challenge")
            })
        })
        .await?;

        found.map(|document| challenge_from_document(&document)).transpose()
    }
}

fn challenge_from_document(document: &Document) -> anyhow::Result<ChallengeInfo> {
    let id = match document.get("_id") {
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        Some(Bson::String(value)) => value.to_string(),
        _ => return Err(anyhow!("Challenge has unsupported _id type")),
    };

    let title = document
        .get_str("title")
        .map_err(|_| anyhow!("Challenge {} has no title", id))?
        .to_string();
    let description = document.get_str("description").unwrap_or_default().to_string();

    Ok(ChallengeInfo {
        id,
        title,
        description,
    })
}

/// The two cache commands the challenge cache needs.
#[async_trait]
trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> anyhow::Result<()>;
}

struct RedisCache(ConnectionManager);

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.0.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .context("Failed to read challenge cache")
    }

    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> anyhow::Result<()> {
        let mut conn = self.0.clone();
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .context("Failed to cache challenge")
    }
}

/// Read-through Redis cache in front of another [`ChallengeLookup`].
///
/// Only hits are cached. Any Redis fault degrades to the inner lookup.
pub struct CachedChallengeLookup {
    inner: Arc<dyn ChallengeLookup>,
    cache: Box<dyn CacheBackend>,
    ttl_secs: u64,
}

impl CachedChallengeLookup {
    pub fn new(inner: Arc<dyn ChallengeLookup>, redis: ConnectionManager, ttl_secs: u64) -> Self {
        Self::with_backend(inner, Box::new(RedisCache(redis)), ttl_secs)
    }

    fn with_backend(
        inner: Arc<dyn ChallengeLookup>,
        cache: Box<dyn CacheBackend>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            inner,
            cache,
            ttl_secs,
        }
    }

    async fn get_cached(&self, challenge_id: &str) -> anyhow::Result<Option<ChallengeInfo>> {
        let key = cache_key(challenge_id);
        let raw = track_cache_operation("get", self.cache.get(&key)).await?;

        raw.map(|json| serde_json::from_str(&json).context("Corrupt challenge cache entry"))
            .transpose()
    }

    async fn cache(&self, challenge: &ChallengeInfo) -> anyhow::Result<()> {
        let json = serde_json::to_string(challenge)?;
        let key = cache_key(&challenge.id);
        track_cache_operation("setex", self.cache.set_ex(&key, json, self.ttl_secs)).await
    }
}

#[async_trait]
impl ChallengeLookup for CachedChallengeLookup {
    async fn find(&self, challenge_id: &str) -> anyhow::Result<Option<ChallengeInfo>> {
        match self.get_cached(challenge_id).await {
            Ok(Some(challenge)) => {
                record_cache_hit();
                return Ok(Some(challenge));
            }
            Ok(None) => record_cache_miss(),
            Err(e) => {
                record_cache_miss();
                tracing::warn!("Challenge cache read failed for {}: {:#}", challenge_id, e);
            }
        }

        let found = self.inner.find(challenge_id).await?;

        if let Some(challenge) = &found {
            if let Err(e) = self.cache(challenge).await {
                tracing::warn!("Challenge cache write failed for {}: {:#}", challenge_id, e);
            }
        }

        Ok(found)
    }
}

fn cache_key(challenge_id: &str) -> String {
    format!("challenge:cache:{}", challenge_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_store::InMemoryChallengeLookup;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn document_with_object_id_maps_to_hex() {
        let oid = ObjectId::new();
        let document = doc! {
            "_id": oid,
            "title": "Two Sum",
            "description": "Return indices of the two numbers adding up to target.",
            "difficulty": "easy",
        };

        let challenge = challenge_from_document(&document).unwrap();
        assert_eq!(challenge.id, oid.to_hex());
        assert_eq!(challenge.title, "Two Sum");
        assert!(challenge.description.starts_with("Return indices"));
    }

    #[test]
    fn document_with_string_id_and_no_description() {
        let document = doc! { "_id": "two-sum", "title": "Two Sum" };

        let challenge = challenge_from_document(&document).unwrap();
        assert_eq!(challenge.id, "two-sum");
        assert_eq!(challenge.description, "");
    }

    #[test]
    fn document_without_title_is_rejected() {
        let document = doc! { "_id": "two-sum", "description": "..." };
        assert!(challenge_from_document(&document).is_err());

        let document = doc! { "_id": 42, "title": "Two Sum" };
        assert!(challenge_from_document(&document).is_err());
    }

    #[test]
    fn cache_key_is_namespaced() {
        assert_eq!(cache_key("abc"), "challenge:cache:abc");
    }

    #[derive(Default)]
    struct FakeCache {
        entries: Mutex<HashMap<String, (String, u64)>>,
        broken: bool,
    }

    #[async_trait]
    impl CacheBackend for Arc<FakeCache> {
        async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            if self.broken {
                return Err(anyhow!("connection refused"));
            }
            Ok(self.entries.lock().unwrap().get(key).map(|(value, _)| value.clone()))
        }

        async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> anyhow::Result<()> {
            if self.broken {
                return Err(anyhow!("connection refused"));
            }
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), (value, ttl_secs));
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingLookup {
        inner: InMemoryChallengeLookup,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChallengeLookup for CountingLookup {
        async fn find(&self, challenge_id: &str) -> anyhow::Result<Option<ChallengeInfo>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.find(challenge_id).await
        }
    }

    fn two_sum() -> ChallengeInfo {
        ChallengeInfo {
            id: "two-sum".to_string(),
            title: "Two Sum".to_string(),
            description: "find indices".to_string(),
        }
    }

    fn cached(inner: Arc<CountingLookup>, cache: Arc<FakeCache>) -> CachedChallengeLookup {
        CachedChallengeLookup::with_backend(inner, Box::new(cache), DEFAULT_CACHE_TTL_SECS)
    }

    #[tokio::test]
    async fn cache_hit_skips_inner_lookup() {
        let inner = Arc::new(CountingLookup::default());
        let cache = Arc::new(FakeCache::default());
        cache.entries.lock().unwrap().insert(
            cache_key("two-sum"),
            (serde_json::to_string(&two_sum()).unwrap(), DEFAULT_CACHE_TTL_SECS),
        );

        let lookup = cached(inner.clone(), cache);
        let found = lookup.find("two-sum").await.unwrap();

        assert_eq!(found, Some(two_sum()));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cache_miss_fills_from_inner() {
        let inner = Arc::new(CountingLookup::default());
        inner.inner.insert(two_sum()).await;
        let cache = Arc::new(FakeCache::default());
        let lookup = cached(inner.clone(), cache.clone());

        assert_eq!(lookup.find("two-sum").await.unwrap(), Some(two_sum()));
        assert_eq!(lookup.find("two-sum").await.unwrap(), Some(two_sum()));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        let entries = cache.entries.lock().unwrap();
        let (_, ttl) = entries.get(&cache_key("two-sum")).unwrap();
        assert_eq!(*ttl, DEFAULT_CACHE_TTL_SECS);
    }

    #[tokio::test]
    async fn unknown_challenge_is_not_cached() {
        let inner = Arc::new(CountingLookup::default());
        let cache = Arc::new(FakeCache::default());
        let lookup = cached(inner.clone(), cache.clone());

        assert_eq!(lookup.find("missing").await.unwrap(), None);
        assert_eq!(lookup.find("missing").await.unwrap(), None);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert!(cache.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cache_fault_falls_back_to_inner() {
        let inner = Arc::new(CountingLookup::default());
        inner.inner.insert(two_sum()).await;
        let cache = Arc::new(FakeCache {
            broken: true,
            ..Default::default()
        });
        let lookup = cached(inner.clone(), cache);

        assert_eq!(lookup.find("two-sum").await.unwrap(), Some(two_sum()));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}

//! Dual-tier cache manager.

use super::backend::{HardStore, HardStoreInfo};
use super::key::{CacheKey, CacheKeyGenerator};
use super::redis_store::RedisStore;
use super::soft::SoftCache;
use crate::config::CacheConfig;
use crate::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Durable tier state. All cache paths are valid with the tier disconnected.
#[derive(Clone)]
pub enum HardTier {
    Connected(Arc<dyn HardStore>),
    Disconnected { reason: Option<String> },
}

impl HardTier {
    pub fn is_connected(&self) -> bool {
        matches!(self, HardTier::Connected(_))
    }
}

impl std::fmt::Debug for HardTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HardTier::Connected(store) => f.debug_tuple("Connected").field(&store.name()).finish(),
            HardTier::Disconnected { reason } => f
                .debug_struct("Disconnected")
                .field("reason", reason)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCounters {
    pub soft_hits: u64,
    pub hard_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
}

impl CacheCounters {
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.soft_hits + self.hard_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub soft_size: usize,
    pub soft_capacity: usize,
    pub hard_connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_info: Option<HardStoreInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_error: Option<String>,
    pub counters: CacheCounters,
}

#[derive(Default)]
struct AtomicStats {
    soft_hits: AtomicU64,
    hard_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn to_counters(&self) -> CacheCounters {
        CacheCounters {
            soft_hits: self.soft_hits.load(Ordering::Relaxed),
            hard_hits: self.hard_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Soft LRU tier in front of an optional durable TTL tier.
///
/// Durable-tier failures are logged, counted and swallowed: `get` and `set` always
/// complete, degrading to soft-only behaviour.
pub struct DualCache {
    keys: CacheKeyGenerator,
    soft: SoftCache,
    hard: HardTier,
    ttl: Duration,
    stats: AtomicStats,
}

impl DualCache {
    /// Build from configuration, connecting to Redis when a URL is configured.
    ///
    /// An unreachable Redis yields a disconnected durable tier, never an error.
    pub async fn connect(cfg: &CacheConfig) -> Self {
        let hard = match cfg.redis_url.as_deref() {
            Some(url) => match RedisStore::connect(url).await {
                Ok(store) => HardTier::Connected(Arc::new(store)),
                Err(e) => {
                    warn!(error = %e, "redis unavailable, running soft-cache only");
                    HardTier::Disconnected {
                        reason: Some(e.to_string()),
                    }
                }
            },
            None => HardTier::Disconnected { reason: None },
        };
        Self::with_tier(cfg, hard)
    }

    pub fn with_store(cfg: &CacheConfig, store: Arc<dyn HardStore>) -> Self {
        Self::with_tier(cfg, HardTier::Connected(store))
    }

    pub fn soft_only(cfg: &CacheConfig) -> Self {
        Self::with_tier(cfg, HardTier::Disconnected { reason: None })
    }

    fn with_tier(cfg: &CacheConfig, hard: HardTier) -> Self {
        let mut keys = CacheKeyGenerator::new();
        if let Some(ref prefix) = cfg.key_prefix {
            keys = keys.with_prefix(prefix.clone());
        }
        Self {
            keys,
            soft: SoftCache::new(cfg.soft_capacity),
            hard,
            ttl: cfg.hard_ttl(),
            stats: AtomicStats::default(),
        }
    }

    pub fn key_for(&self, payload: &Value) -> CacheKey {
        self.keys.generate(payload)
    }

    pub fn hard_tier(&self) -> &HardTier {
        &self.hard
    }

    pub async fn get(&self, payload: &Value) -> Option<Value> {
        let key = self.key_for(payload);

        if let Some(value) = self.soft.get(&key) {
            AtomicStats::bump(&self.stats.soft_hits);
            debug!(key = %short(&key), "soft cache hit");
            return Some(value);
        }

        if let HardTier::Connected(store) = &self.hard {
            match store.get(&key).await {
                Ok(Some(bytes)) => match serde_json::from_slice::<Value>(&bytes) {
                    Ok(value) => {
                        self.soft.put(&key, value.clone());
                        AtomicStats::bump(&self.stats.hard_hits);
                        debug!(key = %short(&key), backend = store.name(), "hard cache hit");
                        return Some(value);
                    }
                    Err(e) => {
                        AtomicStats::bump(&self.stats.errors);
                        warn!(key = %short(&key), error = %e, "undecodable hard cache entry");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    AtomicStats::bump(&self.stats.errors);
                    warn!(key = %short(&key), backend = store.name(), error = %e, "hard cache read failed");
                }
            }
        }

        AtomicStats::bump(&self.stats.misses);
        debug!(key = %short(&key), "cache miss");
        None
    }

    pub async fn set(&self, payload: &Value, result: Value) {
        let key = self.key_for(payload);
        let encoded = match &self.hard {
            HardTier::Connected(_) => Some(serde_json::to_vec(&result)),
            HardTier::Disconnected { .. } => None,
        };

        if let Some(evicted) = self.soft.put(&key, result) {
            debug!(evicted = %evicted, "soft cache evicted entry");
        }
        AtomicStats::bump(&self.stats.sets);

        if let (HardTier::Connected(store), Some(encoded)) = (&self.hard, encoded) {
            let written = match encoded {
                Ok(bytes) => store.set(&key, &bytes, self.ttl).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = written {
                AtomicStats::bump(&self.stats.errors);
                warn!(key = %short(&key), backend = store.name(), error = %e, "hard cache write failed");
            }
        }
    }

    /// Typed lookup; an entry that does not decode as `T` counts as a miss.
    pub async fn get_as<T: DeserializeOwned>(&self, payload: &Value) -> Option<T> {
        let value = self.get(payload).await?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                AtomicStats::bump(&self.stats.errors);
                warn!(error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    pub async fn set_as<T: Serialize>(&self, payload: &Value, result: &T) -> Result<()> {
        let value = serde_json::to_value(result)?;
        self.set(payload, value).await;
        Ok(())
    }

    /// Presence in the soft tier, without refreshing recency.
    pub fn soft_contains(&self, payload: &Value) -> bool {
        self.soft.contains(&self.key_for(payload))
    }

    pub fn soft_len(&self) -> usize {
        self.soft.len()
    }

    /// Empty the soft tier; durable entries expire on their own.
    pub fn clear_soft(&self) {
        self.soft.clear();
        debug!("soft cache cleared");
    }

    pub async fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            soft_size: self.soft.len(),
            soft_capacity: self.soft.capacity(),
            hard_connected: self.hard.is_connected(),
            hard_backend: None,
            hard_info: None,
            hard_error: None,
            counters: self.stats.to_counters(),
        };
        match &self.hard {
            HardTier::Connected(store) => {
                stats.hard_backend = Some(store.name().to_string());
                match store.info().await {
                    Ok(info) => stats.hard_info = Some(info),
                    Err(e) => stats.hard_error = Some(e.to_string()),
                }
            }
            HardTier::Disconnected { reason } => stats.hard_error = reason.clone(),
        }
        stats
    }
}

fn short(key: &CacheKey) -> &str {
    let s = key.as_str();
    s.get(..s.len().min(16)).unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use serde_json::json;

    fn cfg(capacity: usize) -> CacheConfig {
        CacheConfig::default().with_soft_capacity(capacity)
    }

    #[tokio::test]
    async fn test_soft_only_round_trip() {
        let cache = DualCache::soft_only(&cfg(10));
        let p = json!({"task": "rewrite", "text": "x"});
        assert_eq!(cache.get(&p).await, None);
        cache.set(&p, json!("y")).await;
        assert_eq!(cache.get(&p).await, Some(json!("y")));

        let stats = cache.stats().await;
        assert!(!stats.hard_connected);
        assert_eq!(stats.soft_size, 1);
        assert_eq!(stats.counters.soft_hits, 1);
        assert_eq!(stats.counters.misses, 1);
        assert_eq!(stats.counters.hit_ratio(), 0.5);
    }

    #[tokio::test]
    async fn test_writes_through_to_hard_tier() {
        let store = Arc::new(MemoryStore::new());
        let cache = DualCache::with_store(&cfg(10), store.clone());
        cache.set(&json!({"a": 1}), json!({"r": true})).await;
        assert_eq!(store.len(), 1);

        let stats = cache.stats().await;
        assert_eq!(stats.hard_backend.as_deref(), Some("memory"));
        assert_eq!(stats.hard_info.unwrap()["entries"], "1");
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Doc {
            title: String,
        }
        let cache = DualCache::soft_only(&cfg(4));
        let p = json!({"doc": 1});
        cache
            .set_as(&p, &Doc { title: "t".into() })
            .await
            .unwrap();
        assert_eq!(cache.get_as::<Doc>(&p).await, Some(Doc { title: "t".into() }));
        assert_eq!(cache.get_as::<u32>(&p).await, None);
        assert_eq!(cache.stats().await.counters.errors, 1);
    }

    #[test]
    fn test_short_key() {
        assert_eq!(short(&CacheKey::new("abc")), "abc");
        assert_eq!(short(&CacheKey::new("0123456789abcdefXYZ")), "0123456789abcdef");
    }
}

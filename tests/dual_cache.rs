//! Dual-tier cache behaviour: LRU eviction, promotion and degraded durable tiers.

use ai_dispatch::cache::{CacheKey, DualCache, HardStore, HardStoreInfo, MemoryStore};
use ai_dispatch::config::CacheConfig;
use ai_dispatch::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Store whose every operation fails, as Redis does when it goes away mid-run.
#[derive(Default)]
struct FailingStore {
    calls: AtomicUsize,
}

impl FailingStore {
    fn fail(&self) -> Error {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Error::store_with_context(
            "connection reset by peer",
            ErrorContext::new().with_source("failing_store"),
        )
    }
}

#[async_trait]
impl HardStore for FailingStore {
    async fn get(&self, _key: &CacheKey) -> Result<Option<Vec<u8>>> {
        Err(self.fail())
    }

    async fn set(&self, _key: &CacheKey, _value: &[u8], _ttl: Duration) -> Result<()> {
        Err(self.fail())
    }

    async fn info(&self) -> Result<HardStoreInfo> {
        Err(self.fail())
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

fn cfg(capacity: usize) -> CacheConfig {
    CacheConfig::default().with_soft_capacity(capacity)
}

#[tokio::test]
async fn test_least_recently_used_entry_is_evicted() {
    let cache = DualCache::soft_only(&cfg(3));
    for i in 0..4 {
        cache.set(&json!({"n": i}), json!(i)).await;
    }
    assert_eq!(cache.soft_len(), 3);
    assert!(!cache.soft_contains(&json!({"n": 0})));
    for i in 1..4 {
        assert!(cache.soft_contains(&json!({"n": i})));
    }
}

#[tokio::test]
async fn test_reading_an_entry_protects_it_from_eviction() {
    let cache = DualCache::soft_only(&cfg(2));
    cache.set(&json!({"n": "a"}), json!("a")).await;
    cache.set(&json!({"n": "b"}), json!("b")).await;
    assert_eq!(cache.get(&json!({"n": "a"})).await, Some(json!("a")));

    cache.set(&json!({"n": "c"}), json!("c")).await;
    assert!(cache.soft_contains(&json!({"n": "a"})));
    assert!(!cache.soft_contains(&json!({"n": "b"})));
}

#[tokio::test]
async fn test_durable_hit_is_promoted_to_soft_tier() {
    let store = Arc::new(MemoryStore::new());
    let cache = DualCache::with_store(&cfg(10), store.clone());
    let payload = json!({"task": "rewrite_text", "text": "hello"});

    cache.set(&payload, json!({"out": "hi"})).await;
    cache.clear_soft();
    assert!(!cache.soft_contains(&payload));

    assert_eq!(cache.get(&payload).await, Some(json!({"out": "hi"})));
    assert!(cache.soft_contains(&payload));
    assert_eq!(cache.get(&payload).await, Some(json!({"out": "hi"})));

    let counters = cache.stats().await.counters;
    assert_eq!(counters.hard_hits, 1);
    assert_eq!(counters.soft_hits, 1);
    assert_eq!(counters.misses, 0);
}

#[tokio::test]
async fn test_equal_payloads_share_an_entry_regardless_of_key_order() {
    let cache = DualCache::soft_only(&cfg(10));
    let a = json!({"text": "x", "model": "m", "opts": {"b": 2, "a": 1}});
    let b = json!({"opts": {"a": 1, "b": 2}, "model": "m", "text": "x"});
    assert_eq!(cache.key_for(&a), cache.key_for(&b));
    assert_ne!(cache.key_for(&a), cache.key_for(&json!({"text": "y", "model": "m"})));

    cache.set(&a, json!("cached")).await;
    assert_eq!(cache.get(&b).await, Some(json!("cached")));
}

#[tokio::test]
async fn test_key_prefix_separates_namespaces() {
    let plain = DualCache::soft_only(&cfg(10));
    let mut prefixed_cfg = cfg(10);
    prefixed_cfg.key_prefix = Some("docs:".into());
    let prefixed = DualCache::soft_only(&prefixed_cfg);

    let payload = json!({"text": "x"});
    let key = prefixed.key_for(&payload);
    assert!(key.as_str().starts_with("docs:"), "{key}");
    assert_ne!(key, plain.key_for(&payload));
}

#[tokio::test]
async fn test_failing_durable_tier_is_swallowed() {
    let store = Arc::new(FailingStore::default());
    let cache = DualCache::with_store(&cfg(10), store.clone());
    let payload = json!({"text": "x"});

    assert_eq!(cache.get(&payload).await, None);
    cache.set(&payload, json!("v")).await;
    assert_eq!(cache.get(&payload).await, Some(json!("v")));

    let stats = cache.stats().await;
    assert!(stats.hard_connected);
    assert_eq!(stats.hard_backend.as_deref(), Some("failing"));
    assert!(stats.hard_error.unwrap().contains("connection reset"));
    assert_eq!(stats.counters.errors, 2);
    assert_eq!(stats.counters.misses, 1);
    assert_eq!(stats.counters.soft_hits, 1);
    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unreachable_redis_degrades_to_soft_only() {
    let cache = DualCache::connect(&cfg(10).with_redis_url("redis://127.0.0.1:1/")).await;
    assert!(!cache.hard_tier().is_connected());

    cache.set(&json!({"k": 1}), json!(1)).await;
    assert_eq!(cache.get(&json!({"k": 1})).await, Some(json!(1)));

    let stats = cache.stats().await;
    assert!(!stats.hard_connected);
    assert!(stats.hard_error.is_some());
}

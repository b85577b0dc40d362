//! Durable (hard) cache stores.

use super::key::CacheKey;
use crate::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Free-form health/usage figures reported by a store.
pub type HardStoreInfo = BTreeMap<String, String>;

/// A TTL-bounded key/value store behind the soft cache.
///
/// Errors are reported to the caller; the dual cache decides to log and swallow them.
#[async_trait]
pub trait HardStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()>;
    async fn info(&self) -> Result<HardStoreInfo>;
    fn name(&self) -> &'static str;
}

#[derive(Clone)]
struct StoreEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

impl StoreEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process TTL store. Stands in for Redis in tests and single-process deployments.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoreEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoreEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Live (unexpired) entry count.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HardStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key.as_str()) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key.as_str());
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.data.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, e| !e.is_expired(now));
        entries.insert(
            key.as_str().to_string(),
            StoreEntry {
                data: value.to_vec(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn info(&self) -> Result<HardStoreInfo> {
        let mut info = HardStoreInfo::new();
        info.insert("entries".to_string(), self.len().to_string());
        Ok(info)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

//! Redis-backed hard cache.

use super::backend::{HardStore, HardStoreInfo};
use super::key::CacheKey;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

/// Upper bound on establishing the initial connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// `INFO` fields surfaced through [`HardStore::info`].
const INFO_FIELDS: &[&str] = &[
    "used_memory_human",
    "connected_clients",
    "total_commands_processed",
];

/// Stores values under their cache key with `SET .. EX ttl`.
///
/// One multiplexed connection is shared by every operation.
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Open a connection and verify it with `PING`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| store_error("invalid Redis URL", e))?;
        let mut conn = tokio::time::timeout(CONNECT_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| {
                Error::store_with_context(
                    "timed out connecting to Redis",
                    ErrorContext::new().with_source("redis_store"),
                )
            })?
            .map_err(|e| store_error("failed to connect to Redis", e))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("Redis PING failed", e))?;

        info!(url = %redacted_url(url), "redis hard cache connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl HardStore for RedisStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let mut con = self.conn.clone();
        con.get::<_, Option<Vec<u8>>>(key.as_str())
            .await
            .map_err(|e| store_error("Redis GET error", e))
    }

    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()> {
        let mut con = self.conn.clone();
        con.set_ex::<_, _, ()>(key.as_str(), value, ttl.as_secs().max(1))
            .await
            .map_err(|e| store_error("Redis SET error", e))
    }

    async fn info(&self) -> Result<HardStoreInfo> {
        let mut con = self.conn.clone();
        let raw: String = redis::cmd("INFO")
            .query_async(&mut con)
            .await
            .map_err(|e| store_error("Redis INFO error", e))?;
        Ok(parse_info(&raw))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

fn store_error(message: &str, e: redis::RedisError) -> Error {
    Error::store_with_context(
        message,
        ErrorContext::new()
            .with_details(e.to_string())
            .with_source("redis_store"),
    )
}

/// Pick [`INFO_FIELDS`] out of an `INFO` reply; missing fields read `N/A`.
fn parse_info(raw: &str) -> HardStoreInfo {
    let mut found = HardStoreInfo::new();
    for line in raw.lines() {
        if let Some((k, v)) = line.trim().split_once(':') {
            if INFO_FIELDS.contains(&k) {
                found.insert(k.to_string(), v.to_string());
            }
        }
    }
    for field in INFO_FIELDS {
        found
            .entry(field.to_string())
            .or_insert_with(|| "N/A".to_string());
    }
    found
}

/// Strip credentials from a connection URL before logging it.
fn redacted_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut u) => {
            if u.password().is_some() {
                let _ = u.set_password(Some("***"));
            }
            u.to_string()
        }
        Err(_) => "<unparseable>".to_string(),
    }
}

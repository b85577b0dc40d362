//! 双层响应缓存：进程内 LRU 软缓存 + 可选的 Redis 硬缓存。
//!
//! # Dual-Tier Cache
//!
//! Deduplicates semantically identical requests in front of the dispatcher.
//!
//! `get` checks the soft tier, then the durable tier (promoting hits into the soft
//! tier). `set` writes both; durable-tier failures are logged and swallowed, so the
//! cache keeps working soft-only when Redis is down.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`DualCache`] | Two-tier lookup, write-through, statistics |
//! | [`SoftCache`] | Capacity-bounded LRU tier |
//! | [`HardStore`] | Trait for durable TTL stores |
//! | [`RedisStore`] | Redis implementation (`SET .. EX`, `GET`, `INFO`) |
//! | [`MemoryStore`] | In-process TTL store |
//! | [`CacheKeyGenerator`] | SHA-256 over canonical JSON |

mod backend;
mod key;
mod manager;
mod redis_store;
mod soft;

pub use backend::{HardStore, HardStoreInfo, MemoryStore};
pub use key::{canonical_json, CacheKey, CacheKeyGenerator};
pub use manager::{CacheCounters, CacheStats, DualCache, HardTier};
pub use redis_store::RedisStore;
pub use soft::SoftCache;

//! # ai-dispatch
//!
//! 多厂商大模型请求调度器：按密钥限流、熔断、退避重试，以及双层响应缓存。
//!
//! Multi-provider LLM request dispatcher with per-key rate limiting, circuit
//! breaking and retry, fronted by a dual-tier (in-process LRU + Redis) response cache.
//!
//! ## Overview
//!
//! Calls flow `cache → dispatcher → key selector → provider`:
//!
//! 1. [`DualCache`] looks the canonical request payload up in the soft LRU tier, then
//!    in the durable tier.
//! 2. On a miss the [`Dispatcher`] renders the prompt, asks the [`KeySelector`] for a
//!    usable key (waiting while every key is over quota or circuit-open), and issues
//!    the chat completion.
//! 3. Provider failures count against the key and are retried with exponential
//!    backoff on a freshly selected key; a call that runs out of attempts comes back
//!    as a structured error result, never as `Err`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_dispatch::{DispatchContext, Task};
//!
//! #[tokio::main]
//! async fn main() -> ai_dispatch::Result<()> {
//!     let ctx = DispatchContext::from_env().await?;
//!     let out = ctx.run_task(Task::RewriteText, "I has a apple.", None).await?;
//!     println!("{}", out.content.to_display_string());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Environment / YAML configuration and validation |
//! | [`keys`] | Key registry, per-key quota windows and health, key selection |
//! | [`resilience`] | Sliding windows and circuit breaker primitives |
//! | [`dispatch`] | Dispatcher, retry policy, error classes, output parsing |
//! | [`cache`] | Dual-tier response cache and durable stores |
//! | [`transport`] | Provider HTTP transport behind the [`ChatBackend`] trait |
//! | [`types`] | Chat-completion wire types and token usage |
//! | [`tasks`] | Built-in document tasks and their prompts |
//! | [`context`] | [`DispatchContext`], the owner of all runtime state |

pub mod cache;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod keys;
pub mod resilience;
pub mod tasks;
pub mod transport;
pub mod types;

pub use cache::{CacheStats, DualCache, HardStore, MemoryStore, RedisStore};
pub use config::DispatchConfig;
pub use context::DispatchContext;
pub use dispatch::{CallMeta, Completion, Content, Dispatcher, ModelListing, Outcome};
pub use keys::{KeyPool, KeySelector, KeySnapshot, KeyState, Provider};
pub use tasks::Task;
pub use transport::{ChatBackend, HttpTransport};
pub use types::{Message, MessageRole};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};

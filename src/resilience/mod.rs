//! 弹性模式模块：按密钥的滑动窗口配额与熔断器。
//!
//! # Resilience Primitives Module
//!
//! Per-key building blocks used by the key pool and the selector.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_window`] | Trailing 60-second windows for request and token quotas |
//! | [`circuit_breaker`] | Consecutive-failure circuit breaker |
//!
//! Neither primitive locks on its own. A key's windows and breaker are mutated
//! together under that key's mutex, so a quota check and the reservation that
//! follows it observe the same state.
//!
//! Both take the current time as an argument (`tokio::time::Instant`), which lets
//! tests drive them with paused tokio time or synthetic instants.

pub mod circuit_breaker;
pub mod rate_window;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
pub use rate_window::{SlidingWindow, WINDOW};

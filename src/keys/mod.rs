//! 密钥注册表：多厂商凭据、按密钥的配额窗口与健康状态。
//!
//! # Key Registry
//!
//! Every configured credential becomes one [`KeyState`]: its connection identity,
//! optional RPM/TPM limits, the trailing quota windows and a circuit breaker. The
//! set of keys is built once per [`KeyPool`] and lives as long as the pool.
//!
//! A key is *usable* at time `t` when its circuit is closed, its request window
//! holds fewer than `rpm_limit` entries, and its token window plus the caller's
//! estimate stays within `tpm_limit`. Absent limits mean unlimited.

mod selector;

pub use selector::{infer_provider, is_temperature_restricted, KeySelector, MIN_POLL_INTERVAL};

use crate::config::DispatchConfig;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, SlidingWindow, WINDOW};
use crate::{Error, ErrorContext, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "siliconflow")]
    SiliconFlow,
    #[serde(rename = "openai")]
    OpenAi,
}

impl Provider {
    /// Registration order: SiliconFlow keys come first in the pool.
    pub const ALL: [Provider; 2] = [Provider::SiliconFlow, Provider::OpenAi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::SiliconFlow => "siliconflow",
            Provider::OpenAi => "openai",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "siliconflow" => Ok(Provider::SiliconFlow),
            "openai" => Ok(Provider::OpenAi),
            other => Err(format!("Unknown provider: {}", other)),
        }
    }
}

/// Mutable per-key state, always accessed under the key's mutex.
#[derive(Debug, Default)]
struct KeyWindows {
    requests: SlidingWindow,
    tokens: SlidingWindow,
    breaker: CircuitBreaker,
}

impl KeyWindows {
    fn prune(&mut self, now: Instant) {
        self.requests.prune(now);
        self.tokens.prune(now);
    }
}

/// Observability view of a key. Never carries the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeySnapshot {
    pub index: usize,
    pub provider: Provider,
    pub base_url: String,
    pub rpm_limit: Option<u32>,
    pub tpm_limit: Option<u64>,
    pub requests_in_window: usize,
    pub tokens_in_window: u64,
    pub consecutive_failures: u32,
    pub circuit_open_remaining_ms: Option<u64>,
}

/// One provider credential plus its quota limits and health.
pub struct KeyState {
    index: usize,
    provider: Provider,
    base_url: String,
    api_key: String,
    rpm_limit: Option<u32>,
    tpm_limit: Option<u64>,
    breaker_cfg: CircuitBreakerConfig,
    windows: Mutex<KeyWindows>,
}

impl KeyState {
    pub fn new(
        index: usize,
        provider: Provider,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        rpm_limit: Option<u32>,
        tpm_limit: Option<u64>,
        breaker_cfg: CircuitBreakerConfig,
    ) -> Self {
        Self {
            index,
            provider,
            base_url: base_url.into(),
            api_key: api_key.into(),
            rpm_limit,
            tpm_limit,
            breaker_cfg,
            windows: Mutex::new(KeyWindows::default()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn rpm_limit(&self) -> Option<u32> {
        self.rpm_limit
    }

    pub fn tpm_limit(&self) -> Option<u64> {
        self.tpm_limit
    }

    // Every critical section leaves the windows consistent, so a poisoned lock is
    // still safe to reuse.
    fn lock(&self) -> MutexGuard<'_, KeyWindows> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop window entries older than the quota window.
    pub fn prune(&self, now: Instant) {
        self.lock().prune(now);
    }

    pub fn is_usable(&self, now: Instant, estimated_tokens: u64) -> bool {
        let mut w = self.lock();
        self.usable_locked(&mut w, now, estimated_tokens)
    }

    fn usable_locked(&self, w: &mut KeyWindows, now: Instant, estimated_tokens: u64) -> bool {
        w.prune(now);
        if w.breaker.is_open(now) {
            return false;
        }
        if let Some(rpm) = self.rpm_limit {
            if w.requests.len() >= rpm as usize {
                return false;
            }
        }
        if let Some(tpm) = self.tpm_limit {
            if w.tokens.total().saturating_add(estimated_tokens) > tpm {
                return false;
            }
        }
        true
    }

    /// Check usability and reserve a request slot in one critical section.
    pub fn try_reserve(&self, now: Instant, estimated_tokens: u64) -> bool {
        let mut w = self.lock();
        if self.usable_locked(&mut w, now, estimated_tokens) {
            w.requests.push(now, 1);
            true
        } else {
            false
        }
    }

    /// Reserve a request slot unconditionally.
    ///
    /// Slots are reserved at selection time and never handed back, even when the
    /// call fails fast; they age out with the window like any other entry.
    pub fn record_reservation(&self, now: Instant) {
        let mut w = self.lock();
        w.prune(now);
        w.requests.push(now, 1);
    }

    /// Record reported token usage. Unknown usage is a no-op.
    pub fn record_usage(&self, now: Instant, used_tokens: Option<u64>) {
        let Some(tokens) = used_tokens else {
            return;
        };
        let mut w = self.lock();
        w.prune(now);
        w.tokens.push(now, tokens);
    }

    pub fn mark_success(&self) {
        self.lock().breaker.on_success();
    }

    pub fn mark_failure(&self, now: Instant) {
        let opened = self.lock().breaker.on_failure(now, &self.breaker_cfg);
        if opened {
            warn!(
                key_index = self.index,
                provider = self.provider.as_str(),
                cooldown_ms = self.breaker_cfg.cooldown.as_millis() as u64,
                "key circuit opened"
            );
        }
    }

    /// Time until this key could next become usable for `estimated_tokens`.
    ///
    /// `None` means the key is usable now, or no window entry will free the
    /// budget it lacks.
    pub fn wait_hint(&self, now: Instant, estimated_tokens: u64) -> Option<Duration> {
        let mut w = self.lock();
        w.prune(now);
        let mut wait: Option<Duration> = None;
        let mut consider = |d: Duration| {
            if !d.is_zero() {
                wait = Some(wait.map_or(d, |cur| cur.min(d)));
            }
        };

        if let Some(rpm) = self.rpm_limit {
            if w.requests.len() >= rpm as usize {
                if let Some(d) = w.requests.until_oldest_expires(now) {
                    consider(d);
                }
            }
        }
        if let Some(tpm) = self.tpm_limit {
            if w.tokens.total().saturating_add(estimated_tokens) > tpm {
                if let Some(d) = w.tokens.until_oldest_expires(now) {
                    consider(d);
                }
            }
        }
        if let Some(d) = w.breaker.open_remaining(now) {
            consider(d);
        }
        wait
    }

    pub fn snapshot(&self, now: Instant) -> KeySnapshot {
        let mut w = self.lock();
        w.prune(now);
        KeySnapshot {
            index: self.index,
            provider: self.provider,
            base_url: self.base_url.clone(),
            rpm_limit: self.rpm_limit,
            tpm_limit: self.tpm_limit,
            requests_in_window: w.requests.len(),
            tokens_in_window: w.tokens.total(),
            consecutive_failures: w.breaker.consecutive_failures(),
            circuit_open_remaining_ms: w
                .breaker
                .snapshot(now, &self.breaker_cfg)
                .open_remaining_ms,
        }
    }
}

impl fmt::Debug for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyState")
            .field("index", &self.index)
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("rpm_limit", &self.rpm_limit)
            .field("tpm_limit", &self.tpm_limit)
            .finish()
    }
}

/// Key registry: the configured credentials, materialized once on first use.
///
/// Initialization is guarded so concurrent first callers build the key list exactly
/// once. An empty configuration is reported as a configuration error.
pub struct KeyPool {
    config: Arc<DispatchConfig>,
    keys: OnceCell<Vec<Arc<KeyState>>>,
}

impl KeyPool {
    pub fn new(config: Arc<DispatchConfig>) -> Self {
        Self {
            config,
            keys: OnceCell::new(),
        }
    }

    /// The key list, building it on first call.
    pub fn keys(&self) -> Result<&[Arc<KeyState>]> {
        self.keys
            .get_or_try_init(|| Self::build(&self.config))
            .map(|v| v.as_slice())
    }

    pub fn is_loaded(&self) -> bool {
        self.keys.get().is_some()
    }

    pub fn get(&self, index: usize) -> Result<Arc<KeyState>> {
        self.keys()?.get(index).cloned().ok_or_else(|| {
            Error::runtime_with_context(
                format!("no key at index {}", index),
                ErrorContext::new().with_source("key_pool"),
            )
        })
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }

    pub fn snapshots(&self) -> Result<Vec<KeySnapshot>> {
        let now = Instant::now();
        Ok(self.keys()?.iter().map(|k| k.snapshot(now)).collect())
    }

    fn build(config: &DispatchConfig) -> Result<Vec<Arc<KeyState>>> {
        let breaker = CircuitBreakerConfig::from(&config.breaker);
        let mut keys = Vec::new();
        for provider in Provider::ALL {
            let section = config.provider(provider);
            let base_url = section.base_url.trim().trim_end_matches('/').to_string();
            for key in section.active_keys() {
                let index = keys.len();
                keys.push(Arc::new(KeyState::new(
                    index,
                    provider,
                    base_url.clone(),
                    key.api_key.trim(),
                    key.rpm_limit,
                    key.tpm_limit,
                    breaker.clone(),
                )));
            }
        }

        if keys.is_empty() {
            return Err(Error::configuration_with_context(
                "No API keys configured. Set SILICONFLOW_API_KEY and/or OPENAI_API_KEY (empty string means disabled).",
                ErrorContext::new().with_source("key_pool"),
            ));
        }

        info!(
            keys = keys.len(),
            window_secs = WINDOW.as_secs(),
            "key pool initialized"
        );
        Ok(keys)
    }
}

impl fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPool")
            .field("loaded", &self.is_loaded())
            .field("keys", &self.keys.get())
            .finish()
    }
}

//! Runtime configuration.
//!
//! Configuration is loaded either from the process environment (the variable names
//! the document service has always used) or from a YAML file. Everything has a
//! default except the credentials themselves.

use crate::keys::Provider;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// At most this many credentials are accepted per provider.
pub const MAX_KEYS_PER_PROVIDER: usize = 2;

pub const DEFAULT_MODEL: &str = "deepseek-ai/DeepSeek-V3";
pub const SILICONFLOW_BASE_URL: &str = "https://api.siliconflow.cn/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    pub api_key: String,
    #[serde(default)]
    pub rpm_limit: Option<u32>,
    #[serde(default)]
    pub tpm_limit: Option<u64>,
}

impl KeyConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            rpm_limit: None,
            tpm_limit: None,
        }
    }

    pub fn with_rpm_limit(mut self, rpm: u32) -> Self {
        self.rpm_limit = Some(rpm);
        self
    }

    pub fn with_tpm_limit(mut self, tpm: u64) -> Self {
        self.tpm_limit = Some(tpm);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub keys: Vec<KeyConfig>,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            keys: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: KeyConfig) -> Self {
        self.keys.push(key);
        self
    }

    /// Keys with a non-blank credential; blank means "disabled".
    pub fn active_keys(&self) -> impl Iterator<Item = &KeyConfig> {
        self.keys.iter().filter(|k| !k.api_key.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Stop at the first error that no other key could fix (HTTP 400, 404, 413,
    /// 422) instead of spending the remaining attempts on it. Off by default.
    pub fail_fast: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            fail_fast: false,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 60,
        }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub soft_capacity: usize,
    pub hard_ttl_secs: u64,
    pub redis_url: Option<String>,
    pub key_prefix: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            soft_capacity: 1000,
            hard_ttl_secs: 86_400,
            redis_url: None,
            key_prefix: None,
        }
    }
}

impl CacheConfig {
    pub fn hard_ttl(&self) -> Duration {
        Duration::from_secs(self.hard_ttl_secs)
    }

    pub fn with_soft_capacity(mut self, capacity: usize) -> Self {
        self.soft_capacity = capacity;
        self
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            pool_max_idle_per_host: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub siliconflow: ProviderConfig,
    pub openai: ProviderConfig,
    pub default_model: String,
    pub estimated_tokens_per_call: u64,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub cache: CacheConfig,
    pub http: HttpConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            siliconflow: ProviderConfig::new(SILICONFLOW_BASE_URL),
            openai: ProviderConfig::new(OPENAI_BASE_URL),
            default_model: DEFAULT_MODEL.to_string(),
            estimated_tokens_per_call: 0,
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            cache: CacheConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl DispatchConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup (tests inject a map here).
    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let provider = |prefix: &str, default_base: &str| {
            let base_url =
                get(&format!("{prefix}_BASE_URL")).unwrap_or_else(|| default_base.to_string());
            let mut cfg = ProviderConfig::new(base_url);
            for (slot, key_var) in [(1, format!("{prefix}_API_KEY")), (2, format!("{prefix}_API_KEY_2"))] {
                if let Some(api_key) = get(&key_var) {
                    cfg.keys.push(KeyConfig {
                        api_key,
                        rpm_limit: get(&format!("{prefix}_KEY{slot}_RPM")).and_then(|v| v.parse().ok()),
                        tpm_limit: get(&format!("{prefix}_KEY{slot}_TPM")).and_then(|v| v.parse().ok()),
                    });
                }
            }
            cfg
        };

        let cfg = Self {
            siliconflow: provider("SILICONFLOW", SILICONFLOW_BASE_URL),
            openai: provider("OPENAI", OPENAI_BASE_URL),
            default_model: get("SILICONFLOW_MODEL").unwrap_or(defaults.default_model),
            estimated_tokens_per_call: parse_or(
                get("SILICONFLOW_ESTIMATED_TOKENS_PER_CALL"),
                defaults.estimated_tokens_per_call,
            ),
            retry: RetryConfig {
                max_attempts: parse_or(
                    get("SILICONFLOW_RETRY_MAX_ATTEMPTS"),
                    defaults.retry.max_attempts,
                ),
                base_delay_ms: parse_or(
                    get("SILICONFLOW_RETRY_BASE_DELAY_MS"),
                    defaults.retry.base_delay_ms,
                ),
                fail_fast: parse_or(get("SILICONFLOW_RETRY_FAIL_FAST"), defaults.retry.fail_fast),
            },
            breaker: BreakerConfig {
                failure_threshold: parse_or(
                    get("SILICONFLOW_CIRCUIT_BREAK_THRESHOLD"),
                    defaults.breaker.failure_threshold,
                ),
                cooldown_secs: parse_or(
                    get("SILICONFLOW_CIRCUIT_BREAK_SECONDS"),
                    defaults.breaker.cooldown_secs,
                ),
            },
            cache: CacheConfig {
                soft_capacity: parse_or(get("SOFT_CACHE_SIZE"), defaults.cache.soft_capacity),
                hard_ttl_secs: parse_or(get("HARD_CACHE_TTL"), defaults.cache.hard_ttl_secs),
                redis_url: get("REDIS_URL"),
                key_prefix: get("CACHE_KEY_PREFIX"),
            },
            http: HttpConfig {
                timeout_secs: parse_or(get("AI_HTTP_TIMEOUT_SECS"), defaults.http.timeout_secs),
                pool_max_idle_per_host: parse_or(
                    get("AI_HTTP_POOL_MAX_IDLE_PER_HOST"),
                    defaults.http.pool_max_idle_per_host,
                ),
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    pub fn provider(&self, provider: Provider) -> &ProviderConfig {
        match provider {
            Provider::SiliconFlow => &self.siliconflow,
            Provider::OpenAi => &self.openai,
        }
    }

    /// Number of non-blank credentials across all providers.
    pub fn active_key_count(&self) -> usize {
        Provider::ALL
            .iter()
            .map(|p| self.provider(*p).active_keys().count())
            .sum()
    }

    /// Structural validation.
    ///
    /// An empty key set is accepted here; the key pool reports it on first use.
    pub fn validate(&self) -> Result<()> {
        for provider in Provider::ALL {
            let p = self.provider(provider);
            let section = provider.as_str();
            if p.active_keys().count() > MAX_KEYS_PER_PROVIDER {
                return Err(invalid(
                    format!("{section}.keys"),
                    format!("at most {MAX_KEYS_PER_PROVIDER} keys per provider are supported"),
                ));
            }
            url::Url::parse(&p.base_url).map_err(|e| {
                invalid(format!("{section}.base_url"), format!("invalid base url: {e}"))
            })?;
            for (i, key) in p.active_keys().enumerate() {
                if key.rpm_limit == Some(0) || key.tpm_limit == Some(0) {
                    return Err(invalid(
                        format!("{section}.keys[{i}]"),
                        "rate limits must be positive; omit them for unlimited",
                    ));
                }
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(invalid("breaker.failure_threshold", "must be at least 1"));
        }
        if self.cache.soft_capacity == 0 {
            return Err(invalid("cache.soft_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn invalid(field: impl Into<String>, msg: impl Into<String>) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("config"),
    )
}

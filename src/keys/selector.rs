//! Key selection: provider-aware round robin under quota and health constraints.

use super::{KeyPool, KeyState, Provider};
use crate::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Floor for the polling interval while every key is exhausted.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

const OPENAI_MODEL_PREFIXES: &[&str] = &[
    "gpt-",
    "text-embedding",
    "whisper",
    "dall-e",
    "o1",
    "o3",
    "o4",
    "omni-",
    "chatgpt",
    "gpt-image-1",
    "tts-",
    "babbage-",
    "davinci-",
];

/// Infer which provider should serve `model` from its name.
///
/// Unlisted model families default to SiliconFlow; selection still falls back to
/// any provider when the inferred one has no usable key.
pub fn infer_provider(model: &str) -> Provider {
    let m = model.trim().to_ascii_lowercase();
    if OPENAI_MODEL_PREFIXES.iter().any(|p| m.starts_with(p)) {
        Provider::OpenAi
    } else {
        Provider::SiliconFlow
    }
}

/// Model families that reject a custom sampling temperature.
pub fn is_temperature_restricted(model: &str) -> bool {
    let m = model.trim().to_ascii_lowercase();
    m.starts_with("gpt-5") || m.starts_with("o1") || m.starts_with("o3") || m.contains("deep-research")
}

/// Chooses and reserves a usable key for each call.
///
/// The scan-and-reserve sequence runs under the selector's cursor lock, and each
/// key's check-and-reserve runs under that key's own lock, so two callers never
/// reserve against the same stale count.
pub struct KeySelector {
    pool: Arc<KeyPool>,
    cursor: Mutex<usize>,
}

impl KeySelector {
    pub fn new(pool: Arc<KeyPool>) -> Self {
        Self {
            pool,
            cursor: Mutex::new(0),
        }
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    /// Select and reserve a key for `model`, waiting until one is usable.
    ///
    /// Exhausted quotas are not an error: the caller is held back, polling at the
    /// earliest time any window frees up (never more often than [`MIN_POLL_INTERVAL`]).
    pub async fn select(&self, model: &str, estimated_tokens: u64) -> Result<Arc<KeyState>> {
        let desired = infer_provider(model);
        self.warn_if_estimate_unsatisfiable(estimated_tokens)?;
        let started = Instant::now();
        loop {
            let now = Instant::now();
            if let Some(key) = self.try_select_at(desired, estimated_tokens, now)? {
                debug!(
                    model,
                    desired = desired.as_str(),
                    key_index = key.index(),
                    provider = key.provider().as_str(),
                    waited_ms = now.saturating_duration_since(started).as_millis() as u64,
                    "key selected"
                );
                return Ok(key);
            }
            let wait = self.next_wait(estimated_tokens, now)?;
            debug!(
                model,
                wait_ms = wait.as_millis() as u64,
                "no usable key, waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Single non-blocking selection attempt for `model`.
    pub fn try_select(&self, model: &str, estimated_tokens: u64) -> Result<Option<Arc<KeyState>>> {
        self.try_select_at(infer_provider(model), estimated_tokens, Instant::now())
    }

    /// Scan from the cursor, first over keys of `desired`, then over every key.
    pub fn try_select_at(
        &self,
        desired: Provider,
        estimated_tokens: u64,
        now: Instant,
    ) -> Result<Option<Arc<KeyState>>> {
        let keys = self.pool.keys()?;
        let n = keys.len();
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let start = *cursor % n;

        let scan = |only: Option<Provider>| {
            (0..n)
                .map(|offset| (start + offset) % n)
                .filter(|&idx| only.map_or(true, |p| keys[idx].provider() == p))
                .find(|&idx| keys[idx].try_reserve(now, estimated_tokens))
        };

        let picked = scan(Some(desired)).or_else(|| scan(None));
        Ok(picked.map(|idx| {
            *cursor = (idx + 1) % n;
            Arc::clone(&keys[idx])
        }))
    }

    /// Shortest time until any key may free a slot or budget, floored at the poll interval.
    fn next_wait(&self, estimated_tokens: u64, now: Instant) -> Result<Duration> {
        let shortest = self
            .pool
            .keys()?
            .iter()
            .filter_map(|k| k.wait_hint(now, estimated_tokens))
            .min();
        Ok(shortest.unwrap_or(MIN_POLL_INTERVAL).max(MIN_POLL_INTERVAL))
    }

    fn warn_if_estimate_unsatisfiable(&self, estimated_tokens: u64) -> Result<()> {
        if estimated_tokens == 0 {
            return Ok(());
        }
        let keys = self.pool.keys()?;
        let unsatisfiable = keys
            .iter()
            .all(|k| k.tpm_limit().is_some_and(|tpm| estimated_tokens > tpm));
        if unsatisfiable {
            warn!(
                estimated_tokens,
                "token estimate exceeds every key's TPM limit; selection will not make progress"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for KeySelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySelector").field("pool", &self.pool).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DispatchConfig, KeyConfig};

    fn selector(cfg: DispatchConfig) -> KeySelector {
        KeySelector::new(Arc::new(KeyPool::new(Arc::new(cfg))))
    }

    fn two_providers() -> DispatchConfig {
        let mut cfg = DispatchConfig::default();
        cfg.siliconflow.keys.push(KeyConfig::new("sf-1"));
        cfg.siliconflow.keys.push(KeyConfig::new("sf-2"));
        cfg.openai.keys.push(KeyConfig::new("oa-1"));
        cfg
    }

    #[test]
    fn test_infer_provider() {
        for m in ["gpt-4o", "GPT-4o-mini", "o1-preview", "o3-mini", "chatgpt-4o-latest", "whisper-1", "dall-e-3", "text-embedding-3-small"] {
            assert_eq!(infer_provider(m), Provider::OpenAi, "{m}");
        }
        for m in ["deepseek-ai/DeepSeek-V3", "Qwen/Qwen2.5-72B-Instruct", ""] {
            assert_eq!(infer_provider(m), Provider::SiliconFlow, "{m}");
        }
    }

    #[test]
    fn test_temperature_restriction() {
        assert!(is_temperature_restricted("gpt-5-mini"));
        assert!(is_temperature_restricted("o1"));
        assert!(is_temperature_restricted("o3-deep-research"));
        assert!(is_temperature_restricted("some-deep-research-model"));
        assert!(!is_temperature_restricted("gpt-4o"));
        assert!(!is_temperature_restricted("deepseek-ai/DeepSeek-V3"));
    }

    #[test]
    fn test_round_robin_within_desired_provider() {
        let s = selector(two_providers());
        let picks: Vec<usize> = (0..4)
            .map(|_| s.try_select("deepseek-ai/DeepSeek-V3", 0).unwrap().unwrap().index())
            .collect();
        assert_eq!(picks, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_prefers_inferred_provider() {
        let s = selector(two_providers());
        for _ in 0..3 {
            let key = s.try_select("gpt-4o", 0).unwrap().unwrap();
            assert_eq!(key.provider(), Provider::OpenAi);
        }
    }

    #[test]
    fn test_falls_back_to_any_provider() {
        let mut cfg = DispatchConfig::default();
        cfg.siliconflow.keys.push(KeyConfig::new("sf-1"));
        let s = selector(cfg);
        let key = s.try_select("gpt-4o", 0).unwrap().unwrap();
        assert_eq!(key.provider(), Provider::SiliconFlow);
    }

    #[test]
    fn test_skips_open_circuit() {
        let s = selector(two_providers());
        let now = Instant::now();
        let first = s.pool().get(0).unwrap();
        for _ in 0..3 {
            first.mark_failure(now);
        }
        let picks: Vec<usize> = (0..3)
            .map(|_| s.try_select_at(Provider::SiliconFlow, 0, now).unwrap().unwrap().index())
            .collect();
        assert_eq!(picks, vec![1, 1, 1]);
    }

    #[test]
    fn test_returns_none_when_exhausted() {
        let mut cfg = DispatchConfig::default();
        cfg.siliconflow.keys.push(KeyConfig::new("sf-1").with_rpm_limit(1));
        let s = selector(cfg);
        let now = Instant::now();
        assert!(s.try_select_at(Provider::SiliconFlow, 0, now).unwrap().is_some());
        assert!(s.try_select_at(Provider::SiliconFlow, 0, now).unwrap().is_none());
        assert!(s
            .try_select_at(Provider::SiliconFlow, 0, now + Duration::from_secs(60))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_next_wait_is_floored() {
        let mut cfg = DispatchConfig::default();
        cfg.siliconflow.keys.push(KeyConfig::new("sf-1").with_rpm_limit(1));
        let s = selector(cfg);
        let t0 = Instant::now();
        s.try_select_at(Provider::SiliconFlow, 0, t0).unwrap();

        assert_eq!(s.next_wait(0, t0 + Duration::from_secs(10)).unwrap(), Duration::from_secs(50));
        assert_eq!(
            s.next_wait(0, t0 + Duration::from_millis(59_990)).unwrap(),
            MIN_POLL_INTERVAL
        );
    }

    #[test]
    fn test_empty_pool_surfaces_configuration_error() {
        let s = selector(DispatchConfig::default());
        assert!(s.try_select("gpt-4o", 0).is_err());
    }
}

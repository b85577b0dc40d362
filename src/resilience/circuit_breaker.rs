use crate::config::BreakerConfig;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerSnapshot {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

impl From<&BreakerConfig> for CircuitBreakerConfig {
    fn from(cfg: &BreakerConfig) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold.max(1),
            cooldown: cfg.cooldown(),
        }
    }
}

/// Consecutive-failure circuit breaker for a single key.
///
/// - Counts consecutive failures; any success resets the count
/// - Opens for `cooldown` once the count reaches the threshold
/// - Holds no lock of its own: it lives inside the key's state and is mutated under
///   the key's mutex together with the quota windows
#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self, now: Instant) -> bool {
        matches!(self.open_until, Some(until) if now < until)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Time until the circuit closes again, if currently open.
    pub fn open_remaining(&self, now: Instant) -> Option<Duration> {
        self.open_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
        self.open_until = None;
    }

    /// Record a failure; returns true when this failure opened (or re-armed) the circuit.
    pub fn on_failure(&mut self, now: Instant, cfg: &CircuitBreakerConfig) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= cfg.failure_threshold {
            self.open_until = Some(now + cfg.cooldown);
            return true;
        }
        false
    }

    pub fn snapshot(&self, now: Instant, cfg: &CircuitBreakerConfig) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            failure_threshold: cfg.failure_threshold,
            cooldown_ms: cfg.cooldown.as_millis() as u64,
            consecutive_failures: self.consecutive_failures,
            open_remaining_ms: self.open_remaining(now).map(|d| d.as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(threshold: u32, cooldown_secs: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_failure_threshold(threshold)
            .with_cooldown(Duration::from_secs(cooldown_secs))
    }

    #[test]
    fn test_circuit_breaker_config_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.cooldown, Duration::from_secs(60));
    }

    #[test]
    fn test_from_breaker_config() {
        let config = CircuitBreakerConfig::from(&BreakerConfig {
            failure_threshold: 4,
            cooldown_secs: 5,
        });
        assert_eq!(config, cfg(4, 5));
    }

    #[test]
    fn test_opens_at_threshold_and_closes_after_cooldown() {
        let config = cfg(3, 60);
        let t0 = Instant::now();
        let mut cb = CircuitBreaker::new();

        assert!(!cb.on_failure(t0, &config));
        assert!(!cb.on_failure(t0, &config));
        assert!(!cb.is_open(t0));

        assert!(cb.on_failure(t0, &config));
        assert!(cb.is_open(t0 + Duration::from_secs(59)));
        assert!(!cb.is_open(t0 + Duration::from_secs(60)));
    }

    #[test]
    fn test_success_resets_failures() {
        let config = cfg(3, 60);
        let t0 = Instant::now();
        let mut cb = CircuitBreaker::new();

        cb.on_failure(t0, &config);
        cb.on_failure(t0, &config);
        cb.on_success();
        assert_eq!(cb.consecutive_failures(), 0);

        // two more failures are not enough after the reset
        cb.on_failure(t0, &config);
        cb.on_failure(t0, &config);
        assert!(!cb.is_open(t0));
    }

    #[test]
    fn test_success_closes_open_circuit() {
        let config = cfg(1, 60);
        let t0 = Instant::now();
        let mut cb = CircuitBreaker::new();
        cb.on_failure(t0, &config);
        assert!(cb.is_open(t0));

        cb.on_success();
        assert!(!cb.is_open(t0));
        assert!(cb.open_remaining(t0).is_none());
    }

    #[test]
    fn test_snapshot() {
        let config = cfg(2, 30);
        let t0 = Instant::now();
        let mut cb = CircuitBreaker::new();
        cb.on_failure(t0, &config);

        let snapshot = cb.snapshot(t0, &config);
        assert_eq!(snapshot.failure_threshold, 2);
        assert_eq!(snapshot.cooldown_ms, 30_000);
        assert_eq!(snapshot.consecutive_failures, 1);
        assert!(snapshot.open_remaining_ms.is_none());

        cb.on_failure(t0, &config);
        let snapshot = cb.snapshot(t0 + Duration::from_secs(10), &config);
        assert_eq!(snapshot.open_remaining_ms, Some(20_000));
    }

    #[test]
    fn test_saturating_failures() {
        let config = cfg(u32::MAX, 60);
        let t0 = Instant::now();
        let mut cb = CircuitBreaker::new();
        for _ in 0..1000 {
            cb.on_failure(t0, &config);
        }
        assert_eq!(cb.consecutive_failures(), 1000);
    }
}

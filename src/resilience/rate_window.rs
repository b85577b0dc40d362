//! Trailing-window counters backing the per-key RPM/TPM quotas.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Quotas are enforced over this trailing window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// A trailing time window of weighted events.
///
/// Events are appended in chronological order and dropped from the front once they
/// are `span` old. Request slots are events of weight 1; token usage events carry the
/// token count as their weight.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    span: Duration,
    events: VecDeque<(Instant, u64)>,
}

impl SlidingWindow {
    pub fn new(span: Duration) -> Self {
        Self {
            span,
            events: VecDeque::new(),
        }
    }

    /// Drop events that are at least `span` old.
    pub fn prune(&mut self, now: Instant) {
        while let Some(&(at, _)) = self.events.front() {
            if now.saturating_duration_since(at) >= self.span {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn push(&mut self, at: Instant, weight: u64) {
        self.events.push_back((at, weight));
    }

    /// Number of events currently held. Call [`prune`](Self::prune) first.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Sum of event weights currently held. Call [`prune`](Self::prune) first.
    pub fn total(&self) -> u64 {
        self.events.iter().map(|(_, w)| *w).sum()
    }

    /// Time until the oldest event leaves the window, if any event is held.
    pub fn until_oldest_expires(&self, now: Instant) -> Option<Duration> {
        self.events
            .front()
            .map(|(at, _)| self.span.saturating_sub(now.saturating_duration_since(*at)))
    }
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self::new(WINDOW)
    }
}

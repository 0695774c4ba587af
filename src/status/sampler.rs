use std::time::Duration;
use tokio::time::Instant;

/// Rate limiter for progress propagation.
///
/// `check_now` answers true at most once per interval. The sampler has no
/// internal synchronization; callers serialize access.
#[derive(Debug, Clone)]
pub struct IntervalSampler {
    interval: Duration,
    last_fired: Instant,
}

impl IntervalSampler {
    pub fn new(interval_ms: u64) -> Self {
        Self::with_interval(Duration::from_millis(interval_ms))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: Instant::now(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true when a full interval elapsed since the last time this returned true
    /// (or since construction), and records the current instant.
    pub fn check_now(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_fired) >= self.interval {
            self.last_fired = now;
            true
        } else {
            false
        }
    }
}

impl Default for IntervalSampler {
    fn default() -> Self {
        Self::new(100)
    }
}

//! Backoff between feed connection attempts.
//!
//! Each failed attempt waits longer than the last, up to a ceiling, with
//! optional random spread so that many caches restarted together do not
//! reconnect in lockstep. A successful handshake resets the schedule.

use rand::Rng;
use std::time::Duration;

/// Reconnect policy for the feed.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// When false the first failure ends the feed.
    pub enabled: bool,
    /// Wait after the first failure.
    pub initial_delay: Duration,
    /// Ceiling for any single wait.
    pub max_delay: Duration,
    /// Growth factor applied after each failure.
    pub backoff_multiplier: f64,
    /// Relative spread applied to every wait, in `[0.0, 1.0]`.
    pub jitter: f64,
    /// Consecutive failures tolerated before giving up. Zero never gives up.
    pub max_attempts: usize,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.2,
            max_attempts: 0,
        }
    }
}

/// Failure counter and wait schedule for one feed.
#[derive(Debug)]
pub struct Backoff {
    config: ReconnectConfig,
    failures: usize,
    next: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        let next = config.initial_delay;
        Self {
            config,
            failures: 0,
            next,
        }
    }

    /// Counts a failed attempt and returns how long to wait before the next
    /// one, or `None` once the feed should give up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.config.enabled {
            return None;
        }
        self.failures += 1;
        if self.exhausted() {
            return None;
        }

        let wait = self.spread(self.next);
        let grown = self.next.mul_f64(self.config.backoff_multiplier);
        self.next = grown.min(self.config.max_delay);
        Some(wait)
    }

    /// Starts the schedule over.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.next = self.config.initial_delay;
    }

    /// Consecutive failures since the last reset.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Returns true when no further attempt will be made.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        !self.config.enabled
            || (self.config.max_attempts > 0 && self.failures >= self.config.max_attempts)
    }

    fn spread(&self, base: Duration) -> Duration {
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
        base.mul_f64(factor).min(self.config.max_delay)
    }
}

//! Delay between timer-driven drains
//!
//! Pure bookkeeping; the caller owns the timer.

use std::time::Duration;

use super::pending::DrainReport;
use crate::config::QueueConfig;

/// Exponential backoff with jitter for the periodic drain
///
/// Grows while drains fail outright and resets once anything gets through.
#[derive(Debug, Clone)]
pub struct DrainBackoff {
    base: Duration,
    max: Duration,
    jitter_factor: f64,
    consecutive_failures: u32,
}

impl DrainBackoff {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
            consecutive_failures: 0,
        }
    }

    /// Fold the outcome of a drain into the backoff state
    pub fn record(&mut self, report: &DrainReport) {
        if report.skipped {
            return;
        }
        if report.all_failed() {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        } else {
            self.consecutive_failures = 0;
        }
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay before the next drain, without jitter
    pub fn base_delay(&self) -> Duration {
        // 2^n overflows quickly; the cap is reached long before 2^20
        let exponent = self.consecutive_failures.min(20);
        self.base
            .saturating_mul(1u32 << exponent)
            .min(self.max)
    }

    /// Delay before the next drain
    ///
    /// `entropy` picks the jitter; any varying value works (clock nanos,
    /// a counter). The result never exceeds the configured maximum.
    pub fn next_delay(&self, entropy: u64) -> Duration {
        let delay = self.base_delay();
        if self.jitter_factor == 0.0 {
            return delay;
        }
        let fraction = (entropy % 1_000) as f64 / 1_000.0;
        let jitter = delay.mul_f64(self.jitter_factor * fraction);
        (delay + jitter).min(self.max)
    }
}

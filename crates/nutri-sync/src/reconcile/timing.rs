//! Staleness checks for cached daily stats
//!
//! Pure functions that can be tested without a clock.

use chrono::{DateTime, Duration, Utc};

use crate::config::RefreshPolicy;
use crate::models::DailyStats;

/// Check whether cached stats should be refetched, using the default
/// 30 second threshold.
///
/// # Arguments
/// * `snapshot` - The cached stats (None if nothing is cached)
/// * `last_fetched_at` - When the cache was last filled from the remote store
/// * `now` - Current time
pub fn should_refresh(
    snapshot: Option<&DailyStats>,
    last_fetched_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    RefreshPolicy::default().should_refresh(snapshot, last_fetched_at, None, now)
}

impl RefreshPolicy {
    pub fn stale_after(&self) -> Duration {
        Duration::milliseconds(self.stale_after_ms as i64)
    }

    pub fn stale_after_mutation(&self) -> Duration {
        Duration::milliseconds(self.stale_after_mutation_ms as i64)
    }

    /// Check whether cached stats should be refetched
    ///
    /// # Returns
    /// `true` when nothing is cached, the cache was never fetched, the cache
    /// is older than the steady-state threshold, or a mutation was confirmed
    /// after the last fetch and the post-mutation threshold has elapsed.
    pub fn should_refresh(
        &self,
        snapshot: Option<&DailyStats>,
        last_fetched_at: Option<DateTime<Utc>>,
        last_confirmed_mutation_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        let (Some(_), Some(fetched)) = (snapshot, last_fetched_at) else {
            return true;
        };

        let elapsed = now - fetched;
        let mutated_since_fetch = last_confirmed_mutation_at.is_some_and(|m| m >= fetched);
        if mutated_since_fetch && elapsed >= self.stale_after_mutation() {
            return true;
        }

        elapsed > self.stale_after()
    }
}

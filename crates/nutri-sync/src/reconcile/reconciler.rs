//! Owner of the cached daily-stats inputs and the optimistic overrides

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::view::{InFlightOverrides, compute_view, progress_toward};
use crate::config::RefreshPolicy;
use crate::error::SyncError;
use crate::models::{DailyProgress, DailyStats, DailyTargets, StatField};
use crate::storage::LocalStore;

/// Local storage keys owned by the reconciler
pub const STATS_CACHE_KEY: &str = "daily_stats_cache";
pub const OVERRIDES_KEY: &str = "daily_stats_overrides";

/// Cached remote inputs, as persisted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedInputs {
    pub plan: Option<DailyStats>,
    pub user: Option<DailyStats>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ReconcilerState {
    cache: CachedInputs,
    overrides: InFlightOverrides,
    last_confirmed_mutation_at: Option<DateTime<Utc>>,
}

/// Keeps the last fetched plan/user snapshots and the in-flight overrides,
/// and derives the merged daily view from them
///
/// Cached snapshots are provisional: the remote store is the source of
/// truth and every fetch replaces them wholesale.
pub struct Reconciler {
    store: Arc<dyn LocalStore>,
    policy: RefreshPolicy,
    state: Mutex<ReconcilerState>,
}

impl Reconciler {
    /// Open the reconciler, loading any cached snapshots and the optimistic
    /// values of writes that were still unconfirmed
    ///
    /// An unreadable cache is discarded; it will be refetched.
    pub fn open(store: Arc<dyn LocalStore>, policy: RefreshPolicy) -> Result<Self, SyncError> {
        let cache: CachedInputs = load_or_default(store.as_ref(), STATS_CACHE_KEY)?;
        let overrides: InFlightOverrides = load_or_default(store.as_ref(), OVERRIDES_KEY)?;
        if !overrides.is_empty() {
            info!("Restored optimistic values for {:?}", overrides.date());
        }

        Ok(Self {
            store,
            policy,
            state: Mutex::new(ReconcilerState {
                cache,
                overrides,
                ..ReconcilerState::default()
            }),
        })
    }

    /// The merged view for `today`
    pub fn view(&self, today: NaiveDate) -> DailyStats {
        let state = self.state.lock().unwrap();
        compute_view(
            state.cache.plan.as_ref(),
            state.cache.user.as_ref(),
            &state.overrides,
            today,
        )
    }

    pub fn progress(&self, today: NaiveDate, targets: &DailyTargets) -> DailyProgress {
        progress_toward(&self.view(today), targets)
    }

    pub fn cached(&self) -> CachedInputs {
        self.state.lock().unwrap().cache.clone()
    }

    pub fn overrides(&self) -> InFlightOverrides {
        self.state.lock().unwrap().overrides.clone()
    }

    pub fn last_fetched_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().cache.last_fetched_at
    }

    pub fn apply_override(&self, today: NaiveDate, field: StatField, value: f64, at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        state.overrides.set(today, field, value, at);
        self.persist_overrides(&state.overrides);
    }

    pub fn apply_meal_override(&self, today: NaiveDate, meal_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.overrides.complete_meal(today, meal_id);
        self.persist_overrides(&state.overrides);
    }

    /// Drop optimistic values outright
    pub fn revert_overrides(&self, fields: &[StatField], meal_ids: &[String]) {
        let mut state = self.state.lock().unwrap();
        for field in fields {
            state.overrides.remove(*field);
        }
        for meal_id in meal_ids {
            state.overrides.remove_meal(meal_id);
        }
        self.persist_overrides(&state.overrides);
    }

    /// Undo one write's optimistic values, back to `previous`
    pub fn restore_overrides(
        &self,
        previous: &InFlightOverrides,
        fields: &[StatField],
        meal_ids: &[String],
    ) {
        let mut state = self.state.lock().unwrap();
        state.overrides.restore(previous, fields, meal_ids);
        self.persist_overrides(&state.overrides);
    }

    /// Note that the remote store confirmed one of our writes
    pub fn record_confirmed_write(&self, at: DateTime<Utc>) {
        self.state.lock().unwrap().last_confirmed_mutation_at = Some(at);
    }

    /// Replace the cached snapshots with freshly fetched ones and persist them
    pub fn record_fetch(
        &self,
        plan: Option<DailyStats>,
        user: Option<DailyStats>,
        fetched_at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let mut state = self.state.lock().unwrap();
        let cache = CachedInputs {
            plan,
            user,
            last_fetched_at: Some(fetched_at),
        };

        let json = serde_json::to_string(&cache).map_err(|e| SyncError::Storage(e.into()))?;
        self.store
            .set(STATS_CACHE_KEY, &json)
            .map_err(SyncError::Storage)?;

        debug!(
            "Cached stats refreshed (plan: {}, user: {})",
            cache.plan.is_some(),
            cache.user.is_some()
        );
        state.cache = cache;
        Ok(())
    }

    /// Drop overrides already reflected by the cached snapshots
    pub fn clear_superseded(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let ReconcilerState {
            cache, overrides, ..
        } = &mut *state;

        let mut removed = 0;
        for confirmed in [cache.plan.as_ref(), cache.user.as_ref()].into_iter().flatten() {
            removed += overrides.clear_superseded(confirmed);
        }
        if removed > 0 {
            info!("Cleared {} confirmed optimistic values", removed);
            self.persist_overrides(overrides);
        }
        removed
    }

    /// Whether the cached inputs are too old to trust at `now`
    pub fn should_refresh(&self, now: DateTime<Utc>) -> bool {
        let state = self.state.lock().unwrap();
        let snapshot = state.cache.user.as_ref().or(state.cache.plan.as_ref());
        self.policy.should_refresh(
            snapshot,
            state.cache.last_fetched_at,
            state.last_confirmed_mutation_at,
            now,
        )
    }

    /// Save the overrides so a restart still counts queued writes
    ///
    /// Failures are logged only: the queued mutations stay durable.
    fn persist_overrides(&self, overrides: &InFlightOverrides) {
        let result = match serde_json::to_string(overrides) {
            Ok(json) => self.store.set(OVERRIDES_KEY, &json),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!("Failed to save optimistic values: {}", e);
        }
    }
}

fn load_or_default<T: Default + DeserializeOwned>(
    store: &dyn LocalStore,
    key: &str,
) -> Result<T, SyncError> {
    Ok(match store.get(key).map_err(SyncError::Storage)? {
        Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!("Discarding unreadable {}: {}", key, e);
            T::default()
        }),
        None => T::default(),
    })
}

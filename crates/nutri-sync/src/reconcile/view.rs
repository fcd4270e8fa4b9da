//! Merging cached snapshots and optimistic overrides into one daily view
//!
//! Everything here is pure: no I/O, no clock reads. Identical inputs give
//! identical output.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{DailyProgress, DailyStats, DailyTargets, StatField};

/// An optimistic local value not yet confirmed by the remote store
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOverride {
    /// Absolute value, as written (or queued) remotely
    pub value: f64,
    pub applied_at: DateTime<Utc>,
}

/// Optimistic values per field, scoped to one day
///
/// An override stays until a confirmed snapshot for the same day, stamped
/// at or after the override, is read back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlightOverrides {
    date: Option<NaiveDate>,
    fields: BTreeMap<StatField, FieldOverride>,
    completed_meal_ids: BTreeSet<String>,
}

impl InFlightOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn get(&self, field: StatField) -> Option<&FieldOverride> {
        self.fields.get(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (StatField, &FieldOverride)> {
        self.fields.iter().map(|(f, o)| (*f, o))
    }

    pub fn completed_meal_ids(&self) -> &BTreeSet<String> {
        &self.completed_meal_ids
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.completed_meal_ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.date = None;
        self.fields.clear();
        self.completed_meal_ids.clear();
    }

    /// Record an optimistic absolute value for `field`
    ///
    /// Overrides from another day are discarded first.
    pub fn set(&mut self, date: NaiveDate, field: StatField, value: f64, applied_at: DateTime<Utc>) {
        self.roll_to(date);
        self.fields.insert(field, FieldOverride { value, applied_at });
    }

    /// Record an optimistically completed meal
    pub fn complete_meal(&mut self, date: NaiveDate, meal_id: impl Into<String>) {
        self.roll_to(date);
        self.completed_meal_ids.insert(meal_id.into());
    }

    /// Drop an override whose write was abandoned
    pub fn remove(&mut self, field: StatField) -> Option<FieldOverride> {
        self.fields.remove(&field)
    }

    pub fn remove_meal(&mut self, meal_id: &str) -> bool {
        self.completed_meal_ids.remove(meal_id)
    }

    /// Put `fields` and `meal_ids` back the way they were in `previous`
    ///
    /// Used to undo one write's overrides without touching those other
    /// writes applied since.
    pub fn restore(&mut self, previous: &InFlightOverrides, fields: &[StatField], meal_ids: &[String]) {
        let same_day = previous.date == self.date;
        for field in fields {
            match previous.get(*field).filter(|_| same_day) {
                Some(o) => {
                    self.fields.insert(*field, *o);
                }
                None => {
                    self.fields.remove(field);
                }
            }
        }
        self.completed_meal_ids.retain(|id| {
            !meal_ids.contains(id) || (same_day && previous.completed_meal_ids.contains(id))
        });
    }

    /// Drop every override that `confirmed` already reflects
    ///
    /// Returns how many overrides were removed.
    pub fn clear_superseded(&mut self, confirmed: &DailyStats) -> usize {
        let Some(date) = self.date else {
            return 0;
        };

        if confirmed.date > date {
            let removed = self.fields.len() + self.completed_meal_ids.len();
            self.clear();
            return removed;
        }
        if confirmed.date < date {
            return 0;
        }

        let before = self.fields.len() + self.completed_meal_ids.len();
        self.fields
            .retain(|_, o| !supersedes(confirmed.last_updated, o.applied_at));
        self.completed_meal_ids
            .retain(|id| !confirmed.completed_meal_ids.contains(id));
        before - self.fields.len() - self.completed_meal_ids.len()
    }

    fn roll_to(&mut self, date: NaiveDate) {
        if self.date != Some(date) {
            self.clear();
            self.date = Some(date);
        }
    }
}

/// A confirmed snapshot stamped at or after an override carries that
/// override's write (or a later one)
fn supersedes(confirmed_at: DateTime<Utc>, applied_at: DateTime<Utc>) -> bool {
    confirmed_at >= applied_at
}

/// Merge the cached plan and user snapshots with in-flight overrides
///
/// - Snapshots dated other than `today` are ignored.
/// - Completed meals are the union of all three sources.
/// - Numbers come from the snapshot with the newer `last_updated` (the user
///   snapshot on a tie), unless an override for that field is newer.
/// - No usable input yields a zeroed snapshot for `today`.
pub fn compute_view(
    plan: Option<&DailyStats>,
    user: Option<&DailyStats>,
    overrides: &InFlightOverrides,
    today: NaiveDate,
) -> DailyStats {
    let plan = plan.filter(|s| s.date == today);
    let user = user.filter(|s| s.date == today);

    let newest = match (plan, user) {
        (Some(p), Some(u)) if p.last_updated > u.last_updated => Some(p),
        (p, u) => u.or(p),
    };

    let mut view = match newest {
        Some(snapshot) => snapshot.clone().sanitized(),
        None => DailyStats::zeroed(today),
    };

    for snapshot in [plan, user].into_iter().flatten() {
        view.completed_meal_ids
            .extend(snapshot.completed_meal_ids.iter().cloned());
    }

    if overrides.date() == Some(today) {
        view.completed_meal_ids
            .extend(overrides.completed_meal_ids().iter().cloned());

        for (field, o) in overrides.fields() {
            if newest.is_some_and(|s| s.last_updated > o.applied_at) {
                continue;
            }
            view.set(field, o.value);
            view.last_updated = view.last_updated.max(o.applied_at);
        }
    }

    view
}

/// Progress toward the daily targets, from merged numbers only
pub fn progress_toward(stats: &DailyStats, targets: &DailyTargets) -> DailyProgress {
    DailyProgress {
        calories_pct: percent(stats.calories_consumed, targets.calories),
        protein_pct: percent(stats.protein_consumed, targets.protein),
        carbs_pct: percent(stats.carbs_consumed, targets.carbs),
        fat_pct: percent(stats.fat_consumed, targets.fat),
        water_pct: percent(f64::from(stats.water_intake), f64::from(targets.water_ml)),
        meals_completed: stats.completed_meal_ids.len(),
    }
}

fn percent(value: f64, target: f64) -> f64 {
    if !target.is_finite() || target <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    (value / target * 100.0).clamp(0.0, 100.0)
}

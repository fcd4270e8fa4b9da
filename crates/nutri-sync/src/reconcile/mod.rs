//! Daily-stats reconciliation
//!
//! Merges the cached plan snapshot, the cached user snapshot and in-flight
//! optimistic values into one view per day, and decides when the cache is
//! too old to trust.

mod reconciler;
mod timing;
mod view;

pub use reconciler::{CachedInputs, OVERRIDES_KEY, Reconciler, STATS_CACHE_KEY};
pub use timing::should_refresh;
pub use view::{FieldOverride, InFlightOverrides, compute_view, progress_toward};

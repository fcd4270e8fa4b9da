//! Domain models for the offline core

mod mutation;
mod reachability;
mod stats;

pub use mutation::{MutationId, MutationState, Payload, PendingMutation};
pub use reachability::{NetworkSignal, ReachabilityEvent, ReachabilityState};
pub use stats::{DailyProgress, DailyStats, DailyTargets, MealNutrition, StatField, start_of_day};

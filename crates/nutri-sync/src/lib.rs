//! Nutri sync crate - Offline resilience for daily nutrition tracking
//!
//! This crate keeps user writes safe while the network comes and goes:
//! - Reachability monitor (passive signal + active probes)
//! - Durable pending-mutation queue with a non-reentrant drain
//! - Daily-stats reconciler merging cached snapshots and optimistic values
//! - Sync orchestrator wiring the three together for user actions
//! - Storage trait abstractions (in-memory and SQLite)
//!
//! This crate has zero UI dependencies; the remote document store and the
//! plan generator are reached through traits.

pub mod actions;
pub mod config;
pub mod error;
pub mod models;
pub mod queue;
pub mod reachability;
pub mod reconcile;
pub mod remote;
pub mod storage;

pub use actions::{
    AbortHandle, AbortSignal, BackgroundTasks, Clock, FixedClock, Notice, NoticeKind,
    SyncOrchestrator, SystemClock, WriteOutcome,
};
pub use config::{MonitorConfig, OrchestratorConfig, QueueConfig, RefreshPolicy, SyncConfig};
pub use error::{ProbeError, QueueError, RemoteError, SyncError};
pub use models::{
    DailyProgress, DailyStats, DailyTargets, MealNutrition, MutationId, MutationState,
    NetworkSignal, Payload, PendingMutation, ReachabilityEvent, ReachabilityState, StatField,
    start_of_day,
};
pub use queue::{DrainBackoff, DrainReport, MutationQueue};
pub use reachability::{HttpProbe, ListenerHandle, Probe, ReachabilityMonitor};
pub use reconcile::{
    FieldOverride, InFlightOverrides, Reconciler, compute_view, progress_toward, should_refresh,
};
pub use remote::{Document, InMemoryRemoteStore, PlanGenerator, RemoteStore};
pub use storage::{InMemoryLocalStore, LocalStore, SqliteLocalStore};

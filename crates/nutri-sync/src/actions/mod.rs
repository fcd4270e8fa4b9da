//! User actions and their sync
//!
//! The orchestrator turns user actions (logging water, completing a meal,
//! a daily check-in, regenerating the plan) into remote writes or queued
//! mutations, and reacts to reconnects.

mod abort;
mod clock;
mod guard;
mod orchestrator;

pub use abort::{AbortHandle, AbortSignal};
pub use clock::{Clock, FixedClock, SystemClock};
pub use guard::{WriteGuard, WriteGuards};
pub use orchestrator::{BackgroundTasks, Notice, NoticeKind, SyncOrchestrator, WriteOutcome};

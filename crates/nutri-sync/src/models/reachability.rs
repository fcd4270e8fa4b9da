//! Reachability state owned by the monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Verified connectivity status
///
/// `is_online` only becomes true through an active probe; it becomes false
/// immediately on a passive offline signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachabilityState {
    /// Current verified status
    pub is_online: bool,
    /// When the status was last confirmed (by probe or passive signal)
    pub last_verified_at: DateTime<Utc>,
    /// When we last went offline, if ever
    pub last_offline_at: Option<DateTime<Utc>>,
    /// Probe rounds in a row where every endpoint failed
    pub consecutive_probe_failures: u32,
}

impl ReachabilityState {
    /// Create the initial state from the passive signal at startup
    pub fn new(initially_online: bool) -> Self {
        let now = Utc::now();
        Self {
            is_online: initially_online,
            last_verified_at: now,
            last_offline_at: if initially_online { None } else { Some(now) },
            consecutive_probe_failures: 0,
        }
    }
}

/// Passive connectivity signal from the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkSignal {
    Online,
    Offline,
}

/// A verified status transition, delivered to listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReachabilityEvent {
    pub is_online: bool,
    pub at: DateTime<Utc>,
}

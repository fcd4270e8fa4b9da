//! Network reachability
//!
//! Combines the platform's passive online/offline signal with active
//! probes against external endpoints.

mod monitor;
mod probe;

pub use monitor::{ListenerHandle, ReachabilityMonitor};
pub use probe::{HttpProbe, Probe};

//! Error types for the sync core
//!
//! Expected failures (network down, write rejected) are reported as values
//! by the public APIs. These types cover the cases that do propagate.

use thiserror::Error;

/// Failure talking to the remote document store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Remote store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Remote call timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Remote store rejected the write: {message}")]
    Rejected { message: String },

    #[error("Remote call cancelled")]
    Cancelled,
}

impl RemoteError {
    /// Whether retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable { .. } | RemoteError::Timeout { .. })
    }
}

/// Failure of a single reachability probe
///
/// Only the monitor sees these; listeners never do.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Probe timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Probe request failed: {message}")]
    Request { message: String },
}

/// Failure of the pending-mutation queue itself (not of a remote write)
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Failed to serialize pending mutations: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Local storage error: {0}")]
    Storage(anyhow::Error),

    #[error("Persisted queue is corrupt: {message}")]
    Corrupt { message: String },
}

/// Failure surfaced to callers of the orchestrator
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Change to {target} could not be saved: {reason}")]
    NotSaved { target: String, reason: String },

    #[error("Operation requires a network connection")]
    Offline,

    #[error("Another update to {target} is still in progress")]
    Busy { target: String },

    #[error("Plan generation failed: {message}")]
    Generation { message: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Failed to serialize daily stats: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Local storage error: {0}")]
    Storage(anyhow::Error),
}

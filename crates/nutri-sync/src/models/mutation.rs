//! Pending mutation model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Field updates for one remote document, keyed by (dot-path) field name
///
/// Insertion order is preserved through serialization.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Unique, generation-ordered identifier for a queued mutation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutationId(pub String);

impl MutationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build an id from a queue sequence number
    ///
    /// Zero-padded so lexical order matches generation order.
    pub fn from_sequence(seq: u64) -> Self {
        Self(format!("m{:016}", seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MutationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle of a mutation inside the queue
///
/// `Enqueued -> Draining -> {Succeeded | RetryPending | Exhausted}`;
/// `RetryPending` goes back to `Enqueued` for the next drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Enqueued,
    Draining,
    Succeeded,
    RetryPending,
    Exhausted,
}

impl MutationState {
    /// Terminal states remove the mutation from the queue
    pub fn is_terminal(self) -> bool {
        matches!(self, MutationState::Succeeded | MutationState::Exhausted)
    }
}

/// A remote write waiting to be replayed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    pub id: MutationId,
    /// Opaque identifier of the remote document to update
    pub target_path: String,
    /// Absolute field values to set (never increments)
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
}

impl PendingMutation {
    pub fn new(
        id: MutationId,
        target_path: impl Into<String>,
        payload: Payload,
        max_retries: u32,
    ) -> Self {
        Self {
            id,
            target_path: target_path.into(),
            payload,
            created_at: Utc::now(),
            retry_count: 0,
            max_retries,
        }
    }

    /// Record a failed write attempt and return the resulting state
    pub fn record_failure(&mut self) -> MutationState {
        self.retry_count = self.retry_count.saturating_add(1);
        if self.retry_count > self.max_retries {
            MutationState::Exhausted
        } else {
            MutationState::RetryPending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Payload {
        let mut p = Payload::new();
        p.insert("waterIntake".into(), json!(750));
        p
    }

    #[test]
    fn test_sequence_ids_sort_in_generation_order() {
        let a = MutationId::from_sequence(9);
        let b = MutationId::from_sequence(10);
        assert!(a < b);
        assert_eq!(a.as_str(), "m0000000000000009");
    }

    #[test]
    fn test_record_failure_exhausts_after_max_retries() {
        let mut m = PendingMutation::new(MutationId::from_sequence(1), "users/42", payload(), 2);
        assert_eq!(m.record_failure(), MutationState::RetryPending);
        assert_eq!(m.record_failure(), MutationState::RetryPending);
        assert_eq!(m.record_failure(), MutationState::Exhausted);
        assert_eq!(m.retry_count, 3);
    }

    #[test]
    fn test_zero_max_retries_exhausts_on_first_failure() {
        let mut m = PendingMutation::new(MutationId::from_sequence(1), "users/42", payload(), 0);
        assert_eq!(m.record_failure(), MutationState::Exhausted);
        assert!(MutationState::Exhausted.is_terminal());
        assert!(!MutationState::RetryPending.is_terminal());
    }

    #[test]
    fn test_payload_keeps_insertion_order() {
        let mut p = Payload::new();
        p.insert("zeta".into(), json!(1));
        p.insert("alpha".into(), json!(2));
        let m = PendingMutation::new(MutationId::from_sequence(1), "users/42", p, 3);
        let json = serde_json::to_string(&m).unwrap();
        let back: PendingMutation = serde_json::from_str(&json).unwrap();
        let keys: Vec<&String> = back.payload.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        assert_eq!(back, m);
    }
}

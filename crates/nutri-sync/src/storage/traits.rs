//! Storage trait definitions

use anyhow::Result;

/// Synchronous key -> string storage
///
/// Each key is owned by exactly one component; components never write
/// each other's keys.
pub trait LocalStore: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    /// Returns only after the value is durable.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}

//! In-memory storage implementation
//!
//! Used in tests and when no durable location is available.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::RwLock;

use super::LocalStore;

/// In-memory implementation of LocalStore
///
/// Uses a HashMap protected by an RwLock for thread-safe access.
/// Contents do not survive the process.
pub struct InMemoryLocalStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryLocalStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore for InMemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().unwrap();
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = InMemoryLocalStore::new();
        assert!(store.get("queue").unwrap().is_none());

        store.set("queue", "[]").unwrap();
        assert_eq!(store.get("queue").unwrap().as_deref(), Some("[]"));

        store.set("queue", "[1]").unwrap();
        assert_eq!(store.get("queue").unwrap().as_deref(), Some("[1]"));
        assert_eq!(store.len(), 1);

        store.remove("queue").unwrap();
        assert!(store.get("queue").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_missing_key_is_ok() {
        let store = InMemoryLocalStore::new();
        assert!(store.remove("nothing").is_ok());
    }
}

//! In-memory remote store
//!
//! Behaves like the real document store (dot-path updates, absolute
//! values) and lets tests simulate outages, rejections and latency.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use super::traits::{Document, RemoteStore};
use crate::error::RemoteError;
use crate::models::Payload;

/// In-memory implementation of RemoteStore
pub struct InMemoryRemoteStore {
    documents: RwLock<HashMap<String, Document>>,
    available: AtomicBool,
    /// Number of upcoming writes to fail with `Unavailable`
    fail_writes: AtomicU32,
    latency: Mutex<Option<Duration>>,
    /// Every applied update, in order
    write_log: Mutex<Vec<(String, Payload)>>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            fail_writes: AtomicU32::new(0),
            latency: Mutex::new(None),
            write_log: Mutex::new(Vec::new()),
        }
    }

    /// Simulate the backend going down (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next `count` writes
    pub fn fail_next_writes(&self, count: u32) {
        self.fail_writes.store(count, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Seed a document directly, bypassing the write log
    pub fn insert_document(&self, path: &str, document: Document) {
        self.documents
            .write()
            .unwrap()
            .insert(path.to_string(), document);
    }

    /// Read a document synchronously
    pub fn document(&self, path: &str) -> Option<Document> {
        self.documents.read().unwrap().get(path).cloned()
    }

    /// Read a (dot-path) field synchronously
    pub fn field(&self, path: &str, field: &str) -> Option<Value> {
        let doc = self.document(path)?;
        let mut parts = field.split('.');
        let mut current = doc.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current.clone())
    }

    /// Updates applied so far, in application order
    pub fn write_log(&self) -> Vec<(String, Payload)> {
        self.write_log.lock().unwrap().clone()
    }

    async fn simulate_network(&self) -> Result<(), RemoteError> {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable {
                message: "backend unreachable".to_string(),
            });
        }
        Ok(())
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Set `value` at a dot path, creating intermediate objects
fn set_path(doc: &mut Document, path: &str, value: Value) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };

    let mut current = doc;
    for part in parts {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Document::new()));
        if !entry.is_object() {
            *entry = Value::Object(Document::new());
        }
        let Value::Object(map) = entry else {
            return;
        };
        current = map;
    }
    current.insert(last.to_string(), value);
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn get(&self, path: &str) -> Result<Option<Document>, RemoteError> {
        self.simulate_network().await?;
        Ok(self.document(path))
    }

    async fn update(&self, path: &str, fields: &Payload) -> Result<(), RemoteError> {
        self.simulate_network().await?;
        if self.take_injected_failure() {
            return Err(RemoteError::Unavailable {
                message: "injected write failure".to_string(),
            });
        }

        let mut documents = self.documents.write().unwrap();
        let doc = documents.entry(path.to_string()).or_default();
        for (key, value) in fields {
            set_path(doc, key, value.clone());
        }
        drop(documents);

        self.write_log
            .lock()
            .unwrap()
            .push((path.to_string(), fields.clone()));
        Ok(())
    }

    async fn set(&self, path: &str, document: &Document) -> Result<(), RemoteError> {
        self.simulate_network().await?;
        if self.take_injected_failure() {
            return Err(RemoteError::Unavailable {
                message: "injected write failure".to_string(),
            });
        }
        self.insert_document(path, document.clone());
        Ok(())
    }
}

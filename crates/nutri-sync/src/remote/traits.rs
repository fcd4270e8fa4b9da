//! Remote store trait definitions

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::models::Payload;

/// A remote document: field name -> JSON value
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Keyed document store reachable over the network
///
/// Updates carry absolute values, so applying the same update twice
/// leaves the document unchanged. The core never asks the store to
/// increment a field.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch a document; `Ok(None)` if it does not exist
    async fn get(&self, path: &str) -> Result<Option<Document>, RemoteError>;

    /// Set the given fields on a document, creating it if needed.
    /// Keys may be dot paths (`dailyStats.waterIntake`) into nested objects.
    async fn update(&self, path: &str, fields: &Payload) -> Result<(), RemoteError>;

    /// Replace a whole document
    async fn set(&self, path: &str, document: &Document) -> Result<(), RemoteError>;
}

/// External service that produces a meal plan for a profile
#[async_trait]
pub trait PlanGenerator: Send + Sync {
    async fn generate(&self, profile: &Document) -> anyhow::Result<Document>;
}

//! Remote document store integration
//!
//! This module provides:
//! - The `RemoteStore` seam over the per-user document store
//! - An in-memory store with failure injection, used by tests and demos
//! - The `PlanGenerator` seam for the external plan-generation service

mod memory;
mod traits;

pub use memory::InMemoryRemoteStore;
pub use traits::{Document, PlanGenerator, RemoteStore};

//! Local durable storage
//!
//! This module defines the key-value abstraction used to persist the
//! pending-mutation queue and cached snapshots across reloads.
//! The trait-based design allows swapping between in-memory and SQLite
//! implementations.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryLocalStore;
pub use sqlite::SqliteLocalStore;
pub use traits::LocalStore;

//! Pending-mutation queue
//!
//! Durable, FIFO-per-target list of remote writes that could not be made
//! immediately. Drained when the network comes back.

mod backoff;
mod pending;

pub use backoff::DrainBackoff;
pub use pending::{DrainReport, MutationQueue, QUEUE_STORAGE_KEY};

//! Call persistence layer
//!
//! Append-only storage contract for turn records and terminal call status.
//! Nothing in the real-time path reads it back; the store only needs to
//! accept writes in order. The SQL-backed implementation lives with the rest
//! of the CRUD plumbing outside this repository; the in-memory store here
//! backs tests and the dev server.

pub mod store;

pub use store::{CallRecord, CallStore, MemoryCallStore};

use thiserror::Error;

/// Persistence errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Unknown call: {0}")]
    UnknownCall(String),

    #[error("Call already finished: {0}")]
    AlreadyFinished(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

//! Storage Layer
//!
//! This module holds everything the engine needs from persistent storage:
//!
//! - The `VersionedStore` contract (multi-version rows, conditional writes,
//!   per-chunk counters, root lock rows, operation log)
//! - `InMemoryStore`, the process-local reference implementation
//! - Domain events broadcast after commits
//!
//! # Architecture
//!
//! The store is the only shared mutable resource. All coordination between
//! concurrent edits (lock rows, sequence counters, guarded commits) goes
//! through its conditional primitives; no in-process state is shared between
//! operations.

mod error;
pub mod events;
mod memory_store;
mod versioned_store;

pub use error::StoreError;
pub use events::GraphEvent;
pub use memory_store::InMemoryStore;
pub use versioned_store::{ClaimOutcome, LockClaim, VersionedStore, WriteBatch};

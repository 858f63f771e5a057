//! Graph Services
//!
//! This module contains the service layer of the chunked graph:
//!
//! - `ChunkedGraph` - root resolution, hierarchy reads and id allocation
//! - `RootLockManager` / `RootLock` - per-root edit serialization
//! - Graph bootstrap (`ChunkedGraph::create_supervoxels`)
//! - The error taxonomy shared by every operation
//!
//! Services coordinate between the storage layer and the edit engine; edits
//! themselves live in [`crate::edits`] and [`crate::operations`].

mod bootstrap;
pub mod error;
pub mod graph;
pub mod root_lock;

pub use error::{
    FatalError, GraphError, GraphResult, LockingError, PostconditionError, PreconditionError,
};
pub use graph::ChunkedGraph;
pub use root_lock::{RootLock, RootLockManager};

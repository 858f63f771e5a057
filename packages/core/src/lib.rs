//! Chunked Graph Core
//!
//! Edit engine for a hierarchical, spatially chunked supervoxel graph: the
//! agglomeration of a neuron segmentation, edited by merges, splits and
//! multicuts with a full undo/redo log.
//!
//! # Architecture
//!
//! - **Chunked hierarchy**: supervoxels at layer 1, level-2 agglomerations per
//!   chunk, one root per object at the top layer
//! - **Versioned store**: every row keeps its history; reads are point-in-time
//! - **Root locks**: edits on disjoint objects run concurrently, edits on the
//!   same object serialize through conditional writes on the store
//! - **Atomic commits**: the log row and every structural row of an edit are
//!   written together or not at all
//!
//! # Modules
//!
//! - [`config`] - Graph configuration
//! - [`models`] - Node ids, edges, rows and log records
//! - [`db`] - Versioned store contract, in-memory store, domain events
//! - [`services`] - Graph service, root resolution, root locks, errors
//! - [`edits`] - Merge/split edit engine and the upward pass
//! - [`cutting`] - Multicut solver
//! - [`operations`] - Operation sum type, undo/redo, execution, retry queue

pub mod config;
pub mod cutting;
pub mod db;
pub mod edits;
pub mod models;
pub mod operations;
pub mod services;

// Re-export commonly used types
pub use config::GraphConfig;
pub use models::*;
pub use operations::{Operation, OperationQueue, OperationResult};
pub use services::*;

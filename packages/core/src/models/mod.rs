//! Data Models
//!
//! This module contains the core data structures of the chunked graph:
//!
//! - `NodeId` / `IdCodec` - 64-bit node addressing and its bit layout
//! - `AtomicEdge` / `CrossChunkEdges` - supervoxel edges and their per-layer grouping
//! - `Cell` / `NodeCells` / `RowMutation` - versioned node rows
//! - `LogRecord` - operation log rows
//! - `BoundingBox` - voxel-space region bounding local subgraph reads

mod bbox;
mod edges;
mod log_record;
mod node;
mod node_id;

pub use bbox::{ranges_overlap, BoundingBox};
pub use edges::{edge_key, AtomicEdge, CrossChunkEdges, EdgeKey};
pub use log_record::{LogRecord, LogRecordKind, VoxelCoord};
pub use node::{Agglomeration, Cell, Column, NodeCells, RowMutation, Versioned};
pub use node_id::{ChunkCoord, ChunkId, DecodedId, IdCodec, IdError, NodeId, OperationId};

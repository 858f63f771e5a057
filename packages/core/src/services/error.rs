//! Service Layer Error Types
//!
//! The error taxonomy every graph operation reports through. Precondition and
//! postcondition failures are raised before any store write; locking errors
//! are the only retryable kind; fatal errors abort and must not be retried.

use crate::db::StoreError;
use crate::models::{ChunkId, IdError, NodeId, OperationId};
use crate::operations::OperationLogError;
use thiserror::Error;

/// Caller input violates a structural requirement
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreconditionError {
    #[error("Operation has no edges")]
    NoEdges,

    #[error("No root ids to lock")]
    NoRoots,

    #[error("Self-loop edge on supervoxel {node_id}")]
    SelfLoop { node_id: NodeId },

    #[error("{node_id} is a layer {layer} node, not a supervoxel")]
    NotSupervoxel { node_id: NodeId, layer: u8 },

    #[error("Supervoxels {node_ids:?} are both sources and sinks")]
    SourceSinkOverlap { node_ids: Vec<NodeId> },

    #[error("Multicut needs at least one source and one sink")]
    MissingTerminals,

    #[error("Edge {source_id}-{sink_id} spans {distance} chunks (maximum {max_distance})")]
    ChunkDistanceExceeded {
        source_id: NodeId,
        sink_id: NodeId,
        distance: u64,
        max_distance: u64,
    },

    #[error("{edges} edges but {affinities} affinities")]
    AffinityCountMismatch { edges: usize, affinities: usize },

    #[error("Supervoxels belong to {} different roots {root_ids:?}. Already split?", .root_ids.len())]
    MultipleRoots { root_ids: Vec<NodeId> },

    #[error("Terminals {node_ids:?} are outside the local subgraph")]
    TerminalsOutsideSubgraph { node_ids: Vec<NodeId> },

    #[error("Unknown node {node_id}")]
    UnknownNode { node_id: NodeId },

    #[error("Root walk from {node_id} ended at {reached} (layer {layer}, expected {expected_layer})")]
    NotARoot {
        node_id: NodeId,
        reached: NodeId,
        layer: u8,
        expected_layer: u8,
    },

    #[error("Root walk from {node_id} ended at superseded root {reached}")]
    SupersededRoot { node_id: NodeId, reached: NodeId },

    #[error("Invalid node id: {0}")]
    InvalidNodeId(IdError),
}

/// The algorithm ran but produced an unusable result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PostconditionError {
    #[error("Minimum cut between {source_ids:?} and {sink_ids:?} is empty")]
    EmptyCut {
        source_ids: Vec<NodeId>,
        sink_ids: Vec<NodeId>,
    },

    #[error("Every minimum cut isolates terminal(s) {node_ids:?}")]
    IsolatingCut { node_ids: Vec<NodeId> },

    #[error("Sources {source_ids:?} remain connected to sinks {sink_ids:?} after the cut")]
    CutDidNotSeparate {
        source_ids: Vec<NodeId>,
        sink_ids: Vec<NodeId>,
    },
}

/// Root lock could not be acquired or was lost
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LockingError {
    #[error("Root {root_id} is locked by {holder}")]
    RootLocked {
        root_id: NodeId,
        holder: OperationId,
    },

    #[error("Root {root_id} was superseded by {new_root_ids:?}")]
    RootSuperseded {
        root_id: NodeId,
        new_root_ids: Vec<NodeId>,
    },

    #[error("Lock on root {root_id} was lost by {operation_id} before commit")]
    LockLost {
        root_id: NodeId,
        operation_id: OperationId,
    },
}

/// Not retryable; the graph or its configuration is unusable
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FatalError {
    #[error("Sequence space of {chunk_id} is exhausted at {sequence}")]
    IdSpaceExhausted { chunk_id: ChunkId, sequence: u64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Top-level error of every graph operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    #[error("Postcondition failed: {0}")]
    Postcondition(#[from] PostconditionError),

    #[error("Locking failed: {0}")]
    Locking(#[from] LockingError),

    #[error("Fatal: {0}")]
    Fatal(#[from] FatalError),

    #[error("Store operation failed: {0}")]
    Store(StoreError),

    #[error("Operation log error: {0}")]
    OperationLog(#[from] OperationLogError),
}

pub type GraphResult<T> = Result<T, GraphError>;

impl From<StoreError> for GraphError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockMismatch {
                root_id, expected, ..
            } => GraphError::Locking(LockingError::LockLost {
                root_id,
                operation_id: expected,
            }),
            other => GraphError::Store(other),
        }
    }
}

impl From<IdError> for GraphError {
    fn from(err: IdError) -> Self {
        match err {
            IdError::SegmentTooNarrow { .. } => {
                GraphError::Fatal(FatalError::InvalidConfiguration(err.to_string()))
            }
            other => GraphError::Precondition(PreconditionError::InvalidNodeId(other)),
        }
    }
}

impl GraphError {
    /// Create an inconsistent-data error for a row that breaks a graph invariant
    pub fn corrupt(node_id: NodeId, context: impl Into<String>) -> Self {
        Self::Store(StoreError::corrupt(node_id, context))
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, GraphError::Precondition(_))
    }

    pub fn is_postcondition(&self) -> bool {
        matches!(self, GraphError::Postcondition(_))
    }

    pub fn is_locking(&self) -> bool {
        matches!(self, GraphError::Locking(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, GraphError::Fatal(_))
    }

    /// Only locking errors are worth re-submitting after re-resolving roots
    pub fn is_retryable(&self) -> bool {
        self.is_locking()
    }
}

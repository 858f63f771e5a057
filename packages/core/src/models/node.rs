//! Node Row Data Structures
//!
//! A node row is a versioned record keyed by [`NodeId`]. Each column keeps
//! every value ever written to it together with the timestamp and operation
//! that produced it; nothing is overwritten in place.
//!
//! # Columns
//!
//! - `Children`: direct constituents one layer down
//! - `Parent`: node one layer up (absent for roots)
//! - `CrossChunkEdges`: per-layer edges to supervoxels in other chunks
//! - `InChunkEdges`: atomic edges inside the chunk (level-2 rows only)
//! - `NewParent`: roots that superseded this root
//! - `FormerParent`: roots this root replaced
//!
//! # Examples
//!
//! ```rust
//! use chunkgraph_core::models::{Cell, NodeId, RowMutation};
//!
//! let row = RowMutation::new(NodeId(42))
//!     .with(Cell::Parent(NodeId(99)))
//!     .with(Cell::Children(vec![]));
//! assert_eq!(row.cells.len(), 2);
//! ```

use super::edges::{AtomicEdge, CrossChunkEdges};
use super::node_id::{NodeId, OperationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column identifiers of the node table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Children,
    Parent,
    CrossChunkEdges,
    InChunkEdges,
    NewParent,
    FormerParent,
}

impl Column {
    /// Columns making up the hierarchy family
    pub const HIERARCHY: [Column; 4] = [
        Column::Children,
        Column::Parent,
        Column::NewParent,
        Column::FormerParent,
    ];

    pub const ALL: [Column; 6] = [
        Column::Children,
        Column::Parent,
        Column::CrossChunkEdges,
        Column::InChunkEdges,
        Column::NewParent,
        Column::FormerParent,
    ];
}

/// A single column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "column", content = "value", rename_all = "snake_case")]
pub enum Cell {
    Children(Vec<NodeId>),
    Parent(NodeId),
    CrossChunkEdges(CrossChunkEdges),
    InChunkEdges(Vec<AtomicEdge>),
    NewParent(Vec<NodeId>),
    FormerParent(Vec<NodeId>),
}

impl Cell {
    pub fn column(&self) -> Column {
        match self {
            Cell::Children(_) => Column::Children,
            Cell::Parent(_) => Column::Parent,
            Cell::CrossChunkEdges(_) => Column::CrossChunkEdges,
            Cell::InChunkEdges(_) => Column::InChunkEdges,
            Cell::NewParent(_) => Column::NewParent,
            Cell::FormerParent(_) => Column::FormerParent,
        }
    }
}

/// One version of a cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub value: T,
    pub timestamp: DateTime<Utc>,
    pub operation_id: Option<OperationId>,
}

/// Versions of the requested columns of one row, newest first per column
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeCells {
    pub node_id: NodeId,
    pub columns: BTreeMap<Column, Vec<Versioned<Cell>>>,
}

impl NodeCells {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            columns: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.values().all(Vec::is_empty)
    }

    /// Newest version of a column
    pub fn latest(&self, column: Column) -> Option<&Versioned<Cell>> {
        self.columns.get(&column).and_then(|versions| versions.first())
    }

    pub fn versions(&self, column: Column) -> &[Versioned<Cell>] {
        self.columns
            .get(&column)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn parent(&self) -> Option<NodeId> {
        match self.latest(Column::Parent).map(|v| &v.value) {
            Some(Cell::Parent(parent)) => Some(*parent),
            _ => None,
        }
    }

    pub fn children(&self) -> Option<&[NodeId]> {
        match self.latest(Column::Children).map(|v| &v.value) {
            Some(Cell::Children(children)) => Some(children),
            _ => None,
        }
    }

    pub fn cross_chunk_edges(&self) -> Option<&CrossChunkEdges> {
        match self.latest(Column::CrossChunkEdges).map(|v| &v.value) {
            Some(Cell::CrossChunkEdges(edges)) => Some(edges),
            _ => None,
        }
    }

    pub fn in_chunk_edges(&self) -> Option<&[AtomicEdge]> {
        match self.latest(Column::InChunkEdges).map(|v| &v.value) {
            Some(Cell::InChunkEdges(edges)) => Some(edges),
            _ => None,
        }
    }

    pub fn new_parents(&self) -> Option<&[NodeId]> {
        match self.latest(Column::NewParent).map(|v| &v.value) {
            Some(Cell::NewParent(ids)) => Some(ids),
            _ => None,
        }
    }

    pub fn former_parents(&self) -> Option<&[NodeId]> {
        match self.latest(Column::FormerParent).map(|v| &v.value) {
            Some(Cell::FormerParent(ids)) => Some(ids),
            _ => None,
        }
    }

    /// Every parent this row ever had, oldest first
    pub fn parent_history(&self) -> Vec<(NodeId, DateTime<Utc>)> {
        self.versions(Column::Parent)
            .iter()
            .rev()
            .filter_map(|v| match v.value {
                Cell::Parent(parent) => Some((parent, v.timestamp)),
                _ => None,
            })
            .collect()
    }
}

/// Cells to write to one row; timestamp and operation id come from the batch
#[derive(Debug, Clone, PartialEq)]
pub struct RowMutation {
    pub node_id: NodeId,
    pub cells: Vec<Cell>,
}

impl RowMutation {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            cells: Vec::new(),
        }
    }

    pub fn with(mut self, cell: Cell) -> Self {
        self.cells.push(cell);
        self
    }
}

/// Level-2 node view assembled from its row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Agglomeration {
    pub node_id: NodeId,
    pub supervoxels: Vec<NodeId>,
    pub in_chunk_edges: Vec<AtomicEdge>,
    pub cross_chunk_edges: CrossChunkEdges,
}

impl Agglomeration {
    /// Every atomic edge of the agglomeration, in-chunk first
    pub fn all_edges(&self) -> impl Iterator<Item = &AtomicEdge> + '_ {
        self.in_chunk_edges
            .iter()
            .chain(self.cross_chunk_edges.iter().map(|(_, edge)| edge))
    }
}

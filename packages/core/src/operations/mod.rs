//! Graph Operations
//!
//! One sum type covers every logged edit: [`Operation::Merge`],
//! [`Operation::Split`], [`Operation::Multicut`], [`Operation::Undo`] and
//! [`Operation::Redo`]. Each variant carries only its own fields; a single
//! `execute` dispatches on the variant (see [`execute`](Operation::execute)).
//!
//! Operations round-trip through the operation log: [`Operation::from_log_record`]
//! rebuilds the operation a row describes, and [`Operation::invert`] gives
//! the operation that undoes it.

pub mod error;
mod execute;
mod retry_queue;
mod undo_redo;

pub use error::OperationLogError;
pub use execute::OperationResult;
pub use retry_queue::OperationQueue;
pub use undo_redo::{resolve_undo_chain, ResolvedOperation};

use crate::config::GraphConfig;
use crate::cutting::MulticutRequest;
use crate::models::{AtomicEdge, IdCodec, LogRecord, LogRecordKind, NodeId, OperationId, VoxelCoord};
use crate::services::{GraphResult, PreconditionError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Join supervoxels by adding atomic edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeOperation {
    pub user_id: String,
    pub added_edges: Vec<[NodeId; 2]>,
    /// One per edge; `default_merge_affinity` is used when absent
    #[serde(default)]
    pub affinities: Option<Vec<f32>>,
    #[serde(default)]
    pub source_coords: Vec<VoxelCoord>,
    #[serde(default)]
    pub sink_coords: Vec<VoxelCoord>,
}

/// Remove atomic edges inside one object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitOperation {
    pub user_id: String,
    pub removed_edges: Vec<[NodeId; 2]>,
    /// Affinities of the removed edges, known once the split is logged
    #[serde(default)]
    pub affinities: Option<Vec<f32>>,
    #[serde(default)]
    pub source_coords: Vec<VoxelCoord>,
    #[serde(default)]
    pub sink_coords: Vec<VoxelCoord>,
}

/// Separate sources from sinks by a minimum cut
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MulticutOperation {
    pub user_id: String,
    pub source_ids: Vec<NodeId>,
    pub sink_ids: Vec<NodeId>,
    #[serde(default)]
    pub source_coords: Vec<VoxelCoord>,
    #[serde(default)]
    pub sink_coords: Vec<VoxelCoord>,
    /// Bounding box padding; the graph's default applies when absent
    #[serde(default)]
    pub bbox_offset: Option<VoxelCoord>,
    /// Edges removed by the cut, known once the multicut is logged
    #[serde(default)]
    pub removed_edges: Vec<[NodeId; 2]>,
    #[serde(default)]
    pub affinities: Option<Vec<f32>>,
}

impl MulticutOperation {
    pub(crate) fn request(&self, default_offset: VoxelCoord) -> MulticutRequest<'_> {
        MulticutRequest {
            source_ids: &self.source_ids,
            sink_ids: &self.sink_ids,
            source_coords: &self.source_coords,
            sink_coords: &self.sink_coords,
            bbox_offset: self.bbox_offset.unwrap_or(default_offset),
        }
    }
}

/// Revert the effect of an earlier operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoOperation {
    pub user_id: String,
    pub superseded_operation_id: OperationId,
}

/// Re-apply an earlier operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedoOperation {
    pub user_id: String,
    pub superseded_operation_id: OperationId,
}

/// A graph edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    Merge(MergeOperation),
    Split(SplitOperation),
    Multicut(MulticutOperation),
    Undo(UndoOperation),
    Redo(RedoOperation),
}

impl Operation {
    pub fn merge(user_id: impl Into<String>, added_edges: Vec<[NodeId; 2]>) -> Self {
        Operation::Merge(MergeOperation {
            user_id: user_id.into(),
            added_edges,
            affinities: None,
            source_coords: Vec::new(),
            sink_coords: Vec::new(),
        })
    }

    pub fn split(user_id: impl Into<String>, removed_edges: Vec<[NodeId; 2]>) -> Self {
        Operation::Split(SplitOperation {
            user_id: user_id.into(),
            removed_edges,
            affinities: None,
            source_coords: Vec::new(),
            sink_coords: Vec::new(),
        })
    }

    pub fn multicut(
        user_id: impl Into<String>,
        source_ids: Vec<NodeId>,
        sink_ids: Vec<NodeId>,
    ) -> Self {
        Operation::Multicut(MulticutOperation {
            user_id: user_id.into(),
            source_ids,
            sink_ids,
            source_coords: Vec::new(),
            sink_coords: Vec::new(),
            bbox_offset: None,
            removed_edges: Vec::new(),
            affinities: None,
        })
    }

    pub fn undo(user_id: impl Into<String>, superseded_operation_id: OperationId) -> Self {
        Operation::Undo(UndoOperation {
            user_id: user_id.into(),
            superseded_operation_id,
        })
    }

    pub fn redo(user_id: impl Into<String>, superseded_operation_id: OperationId) -> Self {
        Operation::Redo(RedoOperation {
            user_id: user_id.into(),
            superseded_operation_id,
        })
    }

    pub fn kind(&self) -> LogRecordKind {
        match self {
            Operation::Merge(_) => LogRecordKind::Merge,
            Operation::Split(_) => LogRecordKind::Split,
            Operation::Multicut(_) => LogRecordKind::Multicut,
            Operation::Undo(_) => LogRecordKind::Undo,
            Operation::Redo(_) => LogRecordKind::Redo,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Operation::Merge(op) => &op.user_id,
            Operation::Split(op) => &op.user_id,
            Operation::Multicut(op) => &op.user_id,
            Operation::Undo(op) => &op.user_id,
            Operation::Redo(op) => &op.user_id,
        }
    }

    fn set_user_id(&mut self, user_id: &str) {
        let field = match self {
            Operation::Merge(op) => &mut op.user_id,
            Operation::Split(op) => &mut op.user_id,
            Operation::Multicut(op) => &mut op.user_id,
            Operation::Undo(op) => &mut op.user_id,
            Operation::Redo(op) => &mut op.user_id,
        };
        *field = user_id.to_string();
    }

    /// Operation that reverts this one
    ///
    /// Edge roles and coordinate roles are swapped; a multicut inverts to a
    /// merge of the edges it removed.
    pub fn invert(&self) -> Operation {
        match self {
            Operation::Merge(op) => Operation::Split(SplitOperation {
                user_id: op.user_id.clone(),
                removed_edges: op.added_edges.clone(),
                affinities: op.affinities.clone(),
                source_coords: op.sink_coords.clone(),
                sink_coords: op.source_coords.clone(),
            }),
            Operation::Split(op) => Operation::Merge(MergeOperation {
                user_id: op.user_id.clone(),
                added_edges: op.removed_edges.clone(),
                affinities: op.affinities.clone(),
                source_coords: op.sink_coords.clone(),
                sink_coords: op.source_coords.clone(),
            }),
            Operation::Multicut(op) => Operation::Merge(MergeOperation {
                user_id: op.user_id.clone(),
                added_edges: op.removed_edges.clone(),
                affinities: op.affinities.clone(),
                source_coords: op.sink_coords.clone(),
                sink_coords: op.source_coords.clone(),
            }),
            Operation::Undo(op) => Operation::Redo(RedoOperation {
                user_id: op.user_id.clone(),
                superseded_operation_id: op.superseded_operation_id,
            }),
            Operation::Redo(op) => Operation::Undo(UndoOperation {
                user_id: op.user_id.clone(),
                superseded_operation_id: op.superseded_operation_id,
            }),
        }
    }

    /// Rebuild the operation a log row describes
    ///
    /// With `multicut_as_split`, a multicut row comes back as a split of the
    /// edges it removed, which replays the cut without re-solving it.
    pub fn from_log_record(
        record: &LogRecord,
        multicut_as_split: bool,
    ) -> Result<Operation, OperationLogError> {
        let operation_id = record.operation_id;
        let kind = record
            .kind(multicut_as_split)
            .ok_or(OperationLogError::UnknownRecordKind { operation_id })?;
        let user_id = record.user_id.clone();
        let source_coords = record.source_coords.clone().unwrap_or_default();
        let sink_coords = record.sink_coords.clone().unwrap_or_default();

        Ok(match kind {
            LogRecordKind::Undo => Operation::Undo(UndoOperation {
                user_id,
                superseded_operation_id: record
                    .undo_operation_id
                    .ok_or_else(|| OperationLogError::missing_column(operation_id, "undo_operation_id"))?,
            }),
            LogRecordKind::Redo => Operation::Redo(RedoOperation {
                user_id,
                superseded_operation_id: record
                    .redo_operation_id
                    .ok_or_else(|| OperationLogError::missing_column(operation_id, "redo_operation_id"))?,
            }),
            LogRecordKind::Merge => Operation::Merge(MergeOperation {
                user_id,
                added_edges: record
                    .added_edges
                    .clone()
                    .ok_or_else(|| OperationLogError::missing_column(operation_id, "added_edges"))?,
                affinities: record.affinities.clone(),
                source_coords,
                sink_coords,
            }),
            LogRecordKind::Split => Operation::Split(SplitOperation {
                user_id,
                removed_edges: record
                    .removed_edges
                    .clone()
                    .ok_or_else(|| OperationLogError::missing_column(operation_id, "removed_edges"))?,
                affinities: record.affinities.clone(),
                source_coords,
                sink_coords,
            }),
            LogRecordKind::Multicut => Operation::Multicut(MulticutOperation {
                user_id,
                source_ids: record
                    .source_ids
                    .clone()
                    .ok_or_else(|| OperationLogError::missing_column(operation_id, "source_ids"))?,
                sink_ids: record
                    .sink_ids
                    .clone()
                    .ok_or_else(|| OperationLogError::missing_column(operation_id, "sink_ids"))?,
                source_coords,
                sink_coords,
                bbox_offset: record.bbox_offset,
                removed_edges: record.removed_edges.clone().unwrap_or_default(),
                affinities: record.affinities.clone(),
            }),
        })
    }

    /// Structural checks that need no store access
    pub fn validate(&self, codec: &IdCodec, config: &GraphConfig) -> GraphResult<()> {
        match self {
            Operation::Merge(op) => {
                validate_edges(codec, &op.added_edges)?;
                validate_affinities(&op.added_edges, op.affinities.as_deref())?;
                for [a, b] in &op.added_edges {
                    let distance = codec.chunk_distance(*a, *b)?;
                    if distance > config.max_merge_chunk_distance {
                        return Err(PreconditionError::ChunkDistanceExceeded {
                            source_id: *a,
                            sink_id: *b,
                            distance,
                            max_distance: config.max_merge_chunk_distance,
                        }
                        .into());
                    }
                }
                Ok(())
            }
            Operation::Split(op) => {
                validate_edges(codec, &op.removed_edges)?;
                validate_affinities(&op.removed_edges, op.affinities.as_deref())
            }
            Operation::Multicut(op) => {
                if op.source_ids.is_empty() || op.sink_ids.is_empty() {
                    return Err(PreconditionError::MissingTerminals.into());
                }
                for id in op.source_ids.iter().chain(&op.sink_ids) {
                    require_supervoxel(*id)?;
                }
                let sources: BTreeSet<NodeId> = op.source_ids.iter().copied().collect();
                let overlap: Vec<NodeId> = op
                    .sink_ids
                    .iter()
                    .filter(|id| sources.contains(id))
                    .copied()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                if !overlap.is_empty() {
                    return Err(PreconditionError::SourceSinkOverlap { node_ids: overlap }.into());
                }
                Ok(())
            }
            Operation::Undo(_) | Operation::Redo(_) => Ok(()),
        }
    }
}

fn require_supervoxel(id: NodeId) -> GraphResult<()> {
    if id.layer() != 1 {
        return Err(PreconditionError::NotSupervoxel {
            node_id: id,
            layer: id.layer(),
        }
        .into());
    }
    Ok(())
}

fn validate_edges(codec: &IdCodec, edges: &[[NodeId; 2]]) -> GraphResult<()> {
    if edges.is_empty() {
        return Err(PreconditionError::NoEdges.into());
    }
    for [a, b] in edges {
        if a == b {
            return Err(PreconditionError::SelfLoop { node_id: *a }.into());
        }
        require_supervoxel(*a)?;
        require_supervoxel(*b)?;
        codec.decode(*a)?;
        codec.decode(*b)?;
    }
    Ok(())
}

fn validate_affinities(edges: &[[NodeId; 2]], affinities: Option<&[f32]>) -> GraphResult<()> {
    match affinities {
        Some(affinities) if affinities.len() != edges.len() => {
            Err(PreconditionError::AffinityCountMismatch {
                edges: edges.len(),
                affinities: affinities.len(),
            }
            .into())
        }
        _ => Ok(()),
    }
}

/// Atomic edges of `pairs`, with `affinities` or `default_affinity`
pub(crate) fn atomic_edges(
    pairs: &[[NodeId; 2]],
    affinities: Option<&[f32]>,
    default_affinity: f32,
) -> Vec<AtomicEdge> {
    pairs
        .iter()
        .enumerate()
        .map(|(i, [a, b])| {
            let affinity = affinities
                .and_then(|values| values.get(i).copied())
                .unwrap_or(default_affinity);
            AtomicEdge::new(*a, *b, affinity)
        })
        .collect()
}

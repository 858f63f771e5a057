//! Operation execution
//!
//! Every operation kind runs through the same sequence:
//!
//! 1. Undo/redo requests are resolved to the plain edit they re-apply or revert
//! 2. Static preconditions are checked
//! 3. The affected roots are resolved and locked; the lock timestamp becomes
//!    the single read timestamp of the edit
//! 4. The kind-specific edit builds its rows in a fresh mutation context
//! 5. The log row and every produced row are committed in one guarded write
//! 6. The lock is released, on failure as well as on success
//!
//! Nothing is written before step 5, so a failed operation leaves no trace.

use super::{
    atomic_edges, resolve_undo_chain, MulticutOperation, Operation, OperationLogError,
    RedoOperation, UndoOperation,
};
use crate::cutting::{compute_multicut, MulticutPreview};
use crate::db::{GraphEvent, WriteBatch};
use crate::edits::{add_edges, remove_edges, EditOutcome, MutationContext};
use crate::models::{AtomicEdge, LogRecord, NodeId, OperationId};
use crate::services::{ChunkedGraph, GraphResult, PreconditionError, RootLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What a committed operation produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation_id: OperationId,
    pub new_root_ids: Vec<NodeId>,
    /// Level-2 nodes whose meshes must be regenerated
    pub new_level2_ids: Vec<NodeId>,
}

fn edge_pairs(edges: &[AtomicEdge]) -> Vec<[NodeId; 2]> {
    edges.iter().map(|edge| [edge.source, edge.sink]).collect()
}

fn affinities(edges: &[AtomicEdge]) -> Vec<f32> {
    edges.iter().map(|edge| edge.affinity).collect()
}

fn some_if_any<T>(values: &[T]) -> Option<Vec<T>>
where
    T: Clone,
{
    (!values.is_empty()).then(|| values.to_vec())
}

impl Operation {
    /// Apply this operation to `graph` and commit it
    pub async fn execute(&self, graph: &ChunkedGraph) -> GraphResult<OperationResult> {
        let effective = match self {
            Operation::Undo(op) => {
                replay(graph, op.superseded_operation_id, true, &op.user_id).await?
            }
            Operation::Redo(op) => {
                replay(graph, op.superseded_operation_id, false, &op.user_id).await?
            }
            other => other.clone(),
        };
        effective.validate(graph.codec(), graph.config())?;

        let root_ids = effective.affected_roots(graph).await?;
        let lock = graph.lock_manager().acquire(&root_ids).await?;
        let operation_id = lock.operation_id();

        let committed = self.apply_locked(graph, &effective, &lock).await;
        if let Err(e) = lock.release().await {
            tracing::warn!("Releasing lock of {} failed: {}", operation_id, e);
        }
        let result = committed?;

        tracing::info!(
            "Committed {} {}: {} old root(s) -> {} new root(s), {} new level-2 node(s)",
            self.kind(),
            operation_id,
            root_ids.len(),
            result.new_root_ids.len(),
            result.new_level2_ids.len()
        );
        graph.emit(GraphEvent::OperationCommitted {
            operation_id,
            kind: self.kind(),
            new_root_ids: result.new_root_ids.clone(),
            new_level2_ids: result.new_level2_ids.clone(),
        });
        if !result.new_level2_ids.is_empty() {
            graph.emit(GraphEvent::RemeshRequested {
                operation_id,
                level2_ids: result.new_level2_ids.clone(),
            });
        }
        Ok(result)
    }

    /// Roots that must be locked; splits and multicuts require exactly one
    async fn affected_roots(&self, graph: &ChunkedGraph) -> GraphResult<Vec<NodeId>> {
        let (supervoxels, single_root): (Vec<NodeId>, bool) = match self {
            Operation::Merge(op) => (op.added_edges.iter().flatten().copied().collect(), false),
            Operation::Split(op) => (op.removed_edges.iter().flatten().copied().collect(), true),
            Operation::Multicut(op) => (
                op.source_ids.iter().chain(&op.sink_ids).copied().collect(),
                true,
            ),
            Operation::Undo(_) | Operation::Redo(_) => (Vec::new(), false),
        };

        let roots = graph.get_roots(&supervoxels, None, None, false).await?;
        let unique: Vec<NodeId> = roots.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        if single_root && unique.len() != 1 {
            return Err(PreconditionError::MultipleRoots { root_ids: unique }.into());
        }
        Ok(unique)
    }

    async fn apply_locked(
        &self,
        graph: &ChunkedGraph,
        effective: &Operation,
        lock: &RootLock,
    ) -> GraphResult<OperationResult> {
        let operation_id = lock.operation_id();
        let timestamp = lock.timestamp();
        let ctx = MutationContext::new(graph, timestamp);

        let (outcome, mut log) = match effective {
            Operation::Merge(op) => {
                let edges = atomic_edges(
                    &op.added_edges,
                    op.affinities.as_deref(),
                    graph.config().default_merge_affinity,
                );
                let outcome = add_edges(ctx, &edges).await?;
                let mut log = LogRecord::new(operation_id, op.user_id.clone());
                log.added_edges = Some(op.added_edges.clone());
                log.affinities = Some(affinities(&edges));
                log.source_coords = some_if_any(&op.source_coords);
                log.sink_coords = some_if_any(&op.sink_coords);
                (outcome, log)
            }
            Operation::Split(op) => {
                let edges = atomic_edges(&op.removed_edges, op.affinities.as_deref(), 0.0);
                let outcome = remove_edges(ctx, &edges).await?;
                let mut log = LogRecord::new(operation_id, op.user_id.clone());
                log.removed_edges = Some(edge_pairs(&outcome.removed_edges));
                log.affinities = Some(affinities(&outcome.removed_edges));
                log.source_coords = some_if_any(&op.source_coords);
                log.sink_coords = some_if_any(&op.sink_coords);
                (outcome, log)
            }
            Operation::Multicut(op) => {
                let root_id = lock
                    .root_ids()
                    .first()
                    .copied()
                    .ok_or(PreconditionError::NoRoots)?;
                let bbox_offset = op
                    .bbox_offset
                    .unwrap_or(graph.config().multicut.default_bbox_offset);
                let preview = compute_multicut(
                    graph,
                    root_id,
                    &op.request(bbox_offset),
                    &graph.config().multicut,
                    Some(timestamp),
                )
                .await?;
                let outcome = remove_edges(ctx, &preview.removed_edges).await?;
                let mut log = LogRecord::new(operation_id, op.user_id.clone());
                log.removed_edges = Some(edge_pairs(&outcome.removed_edges));
                log.affinities = Some(affinities(&outcome.removed_edges));
                log.source_ids = Some(op.source_ids.clone());
                log.sink_ids = Some(op.sink_ids.clone());
                log.source_coords = some_if_any(&op.source_coords);
                log.sink_coords = some_if_any(&op.sink_coords);
                log.bbox_offset = Some(bbox_offset);
                (outcome, log)
            }
            Operation::Undo(UndoOperation {
                superseded_operation_id,
                ..
            })
            | Operation::Redo(RedoOperation {
                superseded_operation_id,
                ..
            }) => {
                // replay never resolves to another undo or redo
                return Err(OperationLogError::UnknownRecordKind {
                    operation_id: *superseded_operation_id,
                }
                .into());
            }
        };

        // undo and redo rows record the request, not the replayed edit
        match self {
            Operation::Undo(op) => {
                log = LogRecord::new(operation_id, op.user_id.clone());
                log.undo_operation_id = Some(op.superseded_operation_id);
            }
            Operation::Redo(op) => {
                log = LogRecord::new(operation_id, op.user_id.clone());
                log.redo_operation_id = Some(op.superseded_operation_id);
            }
            _ => {}
        }
        log.root_ids = outcome.new_root_ids.clone();

        let EditOutcome {
            new_root_ids,
            new_level2_ids,
            rows,
            ..
        } = outcome;
        let batch = WriteBatch {
            operation_id: Some(operation_id),
            timestamp: Some(timestamp),
            log: Some(log),
            rows,
        };
        graph.store().write_atomic(batch, &lock.claim()).await?;

        Ok(OperationResult {
            operation_id,
            new_root_ids,
            new_level2_ids,
        })
    }
}

/// Plain edit that an undo (`want_undo`) or redo of `operation_id` performs
async fn replay(
    graph: &ChunkedGraph,
    operation_id: OperationId,
    want_undo: bool,
    user_id: &str,
) -> GraphResult<Operation> {
    let resolved = resolve_undo_chain(graph.store().as_ref(), operation_id, want_undo).await?;
    let base = Operation::from_log_record(&resolved.record, true)?;
    let mut effective = if resolved.is_undo { base.invert() } else { base };
    effective.set_user_id(user_id);
    Ok(effective)
}

impl ChunkedGraph {
    /// Rebuild the operation logged under `operation_id`
    pub async fn operation_from_id(
        &self,
        operation_id: OperationId,
        multicut_as_split: bool,
    ) -> GraphResult<Operation> {
        let record = self
            .store()
            .read_log(operation_id)
            .await?
            .ok_or_else(|| OperationLogError::missing_log_record(operation_id))?;
        Ok(Operation::from_log_record(&record, multicut_as_split)?)
    }

    /// Solve a multicut against the current graph without locking or writing
    pub async fn preview_multicut(&self, operation: &MulticutOperation) -> GraphResult<MulticutPreview> {
        let request = Operation::Multicut(operation.clone());
        request.validate(self.codec(), self.config())?;
        let roots = request.affected_roots(self).await?;
        let root_id = roots.first().copied().ok_or(PreconditionError::NoRoots)?;
        let bbox_offset = operation
            .bbox_offset
            .unwrap_or(self.config().multicut.default_bbox_offset);
        compute_multicut(
            self,
            root_id,
            &operation.request(bbox_offset),
            &self.config().multicut,
            None,
        )
        .await
    }
}

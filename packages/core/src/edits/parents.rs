//! Parent regeneration: the upward pass shared by merges and splits
//!
//! Processes one layer at a time, from 2 to `layer_count - 1`. At layer `L`
//! the candidates are the nodes created at `L` plus every surviving child of
//! a superseded node at `L + 1`. Candidates joined by cross-chunk edges
//! resolving at `L` form one component, and every component gets exactly one
//! new parent at `L + 1`. A candidate without siblings still gets a
//! single-child parent so each node's parent sits exactly one layer up.
//!
//! Iteration is over ordered collections only, so the structure produced for
//! a given input state and edge set is the same on every retry.

use super::context::{MutationContext, PendingNode};
use super::{connected_components, EditOutcome};
use crate::models::{AtomicEdge, Cell, CrossChunkEdges, NodeId, RowMutation};
use crate::services::{GraphError, GraphResult};
use std::collections::{BTreeMap, BTreeSet};

/// Run the upward pass from the new level-2 nodes and return the new roots
pub(crate) async fn propagate_to_roots(
    ctx: &mut MutationContext<'_>,
    new_level2_ids: &[NodeId],
) -> GraphResult<Vec<NodeId>> {
    let layer_count = ctx.layer_count();
    let mut layer_nodes: BTreeSet<NodeId> = new_level2_ids.iter().copied().collect();

    for layer in 2..layer_count {
        let mut candidates = layer_nodes.clone();
        for old in ctx.old_ids_at(layer + 1) {
            for child in ctx.children(old).await? {
                if !ctx.old_ids.contains(&child) {
                    candidates.insert(child);
                }
            }
        }
        let candidates: Vec<NodeId> = candidates.into_iter().collect();
        ctx.prefetch(&candidates).await?;

        let mut sibling_pairs = Vec::new();
        for candidate in &candidates {
            let edges = ctx.cross_chunk_edges(*candidate).await?;
            for edge in edges.at(layer) {
                let sibling = ctx.ancestor_at(edge.sink, layer).await?;
                if candidates.binary_search(&sibling).is_err() {
                    return Err(GraphError::corrupt(
                        sibling,
                        format!(
                            "cross-chunk neighbour of {} at layer {} is outside the edited hierarchy",
                            candidate, layer
                        ),
                    ));
                }
                sibling_pairs.push((*candidate, sibling));
            }
        }

        let mut next_layer = BTreeSet::new();
        for members in connected_components(&candidates, sibling_pairs)? {
            let chunk = ctx.codec().parent_chunk_id(members[0], layer + 1)?;
            let parent = ctx.allocate(chunk).await?;

            let mut cross_chunk_edges = CrossChunkEdges::new();
            for member in &members {
                let edges = ctx.cross_chunk_edges(*member).await?;
                cross_chunk_edges.merge_from(&edges, layer + 1);
                ctx.set_parent(*member, parent);
            }

            ctx.add_pending(
                parent,
                PendingNode {
                    children: members,
                    cross_chunk_edges,
                    in_chunk_edges: None,
                },
            );
            next_layer.insert(parent);
        }

        tracing::trace!(
            "Layer {}: {} candidate(s) grouped under {} new parent(s)",
            layer,
            candidates.len(),
            next_layer.len()
        );
        layer_nodes = next_layer;
    }

    Ok(layer_nodes.into_iter().collect())
}

/// Rows written by the edit: new nodes, re-pointed children and root lineage
pub(crate) fn build_rows(ctx: &MutationContext<'_>, new_root_ids: &[NodeId]) -> Vec<RowMutation> {
    let mut rows: BTreeMap<NodeId, RowMutation> = BTreeMap::new();

    for (id, node) in &ctx.pending {
        let row = rows.entry(*id).or_insert_with(|| RowMutation::new(*id));
        row.cells.push(Cell::Children(node.children.clone()));
        row.cells
            .push(Cell::CrossChunkEdges(node.cross_chunk_edges.clone()));
        if let Some(in_chunk_edges) = &node.in_chunk_edges {
            row.cells.push(Cell::InChunkEdges(in_chunk_edges.clone()));
        }
    }

    for (child, parent) in &ctx.reparented {
        rows.entry(*child)
            .or_insert_with(|| RowMutation::new(*child))
            .cells
            .push(Cell::Parent(*parent));
    }

    let old_root_ids = ctx.old_ids_at(ctx.layer_count());
    for old_root in &old_root_ids {
        rows.entry(*old_root)
            .or_insert_with(|| RowMutation::new(*old_root))
            .cells
            .push(Cell::NewParent(new_root_ids.to_vec()));
    }
    for new_root in new_root_ids {
        rows.entry(*new_root)
            .or_insert_with(|| RowMutation::new(*new_root))
            .cells
            .push(Cell::FormerParent(old_root_ids.clone()));
    }

    rows.into_values().collect()
}

/// Finish an edit once its new level-2 nodes are in the context
pub(crate) async fn finish(
    mut ctx: MutationContext<'_>,
    new_level2_ids: Vec<NodeId>,
    removed_edges: Vec<AtomicEdge>,
) -> GraphResult<EditOutcome> {
    let new_root_ids = propagate_to_roots(&mut ctx, &new_level2_ids).await?;
    let rows = build_rows(&ctx, &new_root_ids);
    Ok(EditOutcome {
        new_root_ids,
        new_level2_ids,
        old_root_ids: ctx.old_ids_at(ctx.layer_count()),
        rows,
        removed_edges,
    })
}

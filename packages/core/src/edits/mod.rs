//! Graph Edit Engine
//!
//! Turns a local change of atomic edges into a consistent update of the
//! whole hierarchy. Both entry points work on a [`MutationContext`] that
//! reads the graph as of the edit's lock timestamp and never writes; they
//! return the rows to commit.
//!
//! # Merge (`add_edges`)
//!
//! 1. Classify edges: same supervoxel chunk means in-chunk (layer 1),
//!    otherwise the cross-chunk layer from the ID codec
//! 2. Level-2 parents joined by in-chunk edges form components; each
//!    component becomes one new level-2 node in the chunk of its first member
//! 3. Cross-chunk edges are added to both sides' new level-2 nodes
//! 4. Every ancestor of a touched level-2 node is superseded; the upward pass
//!    regenerates them
//!
//! # Split (`remove_edges`)
//!
//! 1. Drop the edges from every touched level-2 node
//! 2. Recompute in-chunk components; each becomes a new level-2 node. A split
//!    that disconnects nothing still yields one new node per touched node
//! 3. Upward pass as for merges

mod context;
mod parents;

pub use context::{MutationContext, PendingNode};

use crate::models::{edge_key, AtomicEdge, CrossChunkEdges, EdgeKey, IdCodec, NodeId, RowMutation};
use crate::services::{GraphError, GraphResult};
use petgraph::unionfind::UnionFind;
use std::collections::{BTreeMap, BTreeSet};

/// Result of one edit before commit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditOutcome {
    pub new_root_ids: Vec<NodeId>,
    pub new_level2_ids: Vec<NodeId>,
    pub old_root_ids: Vec<NodeId>,
    pub rows: Vec<RowMutation>,
    /// Edges actually removed, with their stored affinities (splits only)
    pub removed_edges: Vec<AtomicEdge>,
}

/// Edges split by resolution layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzedEdges {
    pub in_chunk: Vec<AtomicEdge>,
    pub cross_chunk: Vec<(u8, AtomicEdge)>,
}

/// Classify atomic edges into in-chunk and cross-chunk (with their layer)
pub fn analyze_atomic_edges(codec: &IdCodec, edges: &[AtomicEdge]) -> GraphResult<AnalyzedEdges> {
    let mut analyzed = AnalyzedEdges::default();
    for edge in edges {
        match codec.cross_chunk_edge_layer(edge.source, edge.sink)? {
            1 => analyzed.in_chunk.push(*edge),
            layer => analyzed.cross_chunk.push((layer, *edge)),
        }
    }
    Ok(analyzed)
}

/// Connected components of `nodes` (sorted) under `pairs`
///
/// Components are returned sorted by their smallest member, members sorted.
pub(crate) fn connected_components(
    nodes: &[NodeId],
    pairs: impl IntoIterator<Item = (NodeId, NodeId)>,
) -> GraphResult<Vec<Vec<NodeId>>> {
    let index: BTreeMap<NodeId, usize> = nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let mut components = UnionFind::<usize>::new(nodes.len());
    for (a, b) in pairs {
        let (Some(&ia), Some(&ib)) = (index.get(&a), index.get(&b)) else {
            return Err(GraphError::corrupt(a, format!("edge to {} leaves the component set", b)));
        };
        components.union(ia, ib);
    }

    let mut groups: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
    for (id, i) in &index {
        groups.entry(components.find_mut(*i)).or_default().push(*id);
    }
    let mut groups: Vec<Vec<NodeId>> = groups.into_values().collect();
    groups.sort_by_key(|members| members[0]);
    Ok(groups)
}

fn dedup_edges(edges: impl IntoIterator<Item = AtomicEdge>) -> Vec<AtomicEdge> {
    let mut unique: BTreeMap<EdgeKey, AtomicEdge> = BTreeMap::new();
    for edge in edges {
        unique.entry(edge.key()).or_insert(edge);
    }
    unique.into_values().collect()
}

/// Merge: add atomic edges and regenerate the affected hierarchy
pub async fn add_edges(
    mut ctx: MutationContext<'_>,
    edges: &[AtomicEdge],
) -> GraphResult<EditOutcome> {
    let analyzed = analyze_atomic_edges(ctx.codec(), edges)?;

    let mut level2_of: BTreeMap<NodeId, NodeId> = BTreeMap::new();
    for edge in edges {
        for supervoxel in [edge.source, edge.sink] {
            if !level2_of.contains_key(&supervoxel) {
                let level2 = ctx.ancestor_at(supervoxel, 2).await?;
                level2_of.insert(supervoxel, level2);
            }
        }
    }
    let touched: Vec<NodeId> = level2_of.values().copied().collect::<BTreeSet<_>>().into_iter().collect();
    ctx.prefetch(&touched).await?;

    let pairs: Vec<(NodeId, NodeId)> = analyzed
        .in_chunk
        .iter()
        .map(|edge| (level2_of[&edge.source], level2_of[&edge.sink]))
        .collect();

    let mut new_level2_ids = Vec::new();
    for group in connected_components(&touched, pairs)? {
        let chunk = ctx.codec().chunk_id(group[0])?;
        let new_id = ctx.allocate(chunk).await?;

        let mut supervoxels = BTreeSet::new();
        let mut in_chunk_edges = Vec::new();
        let mut cross_chunk_edges = CrossChunkEdges::new();
        for level2 in &group {
            let agglomeration = ctx.agglomeration(*level2).await?;
            supervoxels.extend(agglomeration.supervoxels);
            in_chunk_edges.extend(agglomeration.in_chunk_edges);
            cross_chunk_edges.merge_from(&agglomeration.cross_chunk_edges, 2);
        }

        in_chunk_edges.extend(
            analyzed
                .in_chunk
                .iter()
                .filter(|edge| supervoxels.contains(&edge.source)),
        );
        for (layer, edge) in &analyzed.cross_chunk {
            for endpoint in [edge.source, edge.sink] {
                if supervoxels.contains(&endpoint) {
                    cross_chunk_edges.insert(*layer, edge.oriented_from(endpoint));
                }
            }
        }

        let children: Vec<NodeId> = supervoxels.into_iter().collect();
        for supervoxel in &children {
            ctx.set_parent(*supervoxel, new_id);
        }
        ctx.add_pending(
            new_id,
            PendingNode {
                children,
                cross_chunk_edges,
                in_chunk_edges: Some(dedup_edges(in_chunk_edges)),
            },
        );
        new_level2_ids.push(new_id);
    }

    ctx.mark_old(&touched).await?;
    parents::finish(ctx, new_level2_ids, Vec::new()).await
}

/// Split: remove atomic edges and regenerate the affected hierarchy
pub async fn remove_edges(
    mut ctx: MutationContext<'_>,
    edges: &[AtomicEdge],
) -> GraphResult<EditOutcome> {
    let keys: BTreeSet<EdgeKey> = edges
        .iter()
        .map(|edge| edge_key(edge.source, edge.sink))
        .collect();

    let mut touched = BTreeSet::new();
    for edge in edges {
        for supervoxel in [edge.source, edge.sink] {
            touched.insert(ctx.ancestor_at(supervoxel, 2).await?);
        }
    }
    let touched: Vec<NodeId> = touched.into_iter().collect();
    ctx.prefetch(&touched).await?;

    let mut removed: BTreeMap<EdgeKey, AtomicEdge> = BTreeMap::new();
    let mut new_level2_ids = Vec::new();

    for level2 in &touched {
        let agglomeration = ctx.agglomeration(*level2).await?;

        let (dropped, kept): (Vec<AtomicEdge>, Vec<AtomicEdge>) = agglomeration
            .in_chunk_edges
            .iter()
            .partition(|edge| keys.contains(&edge.key()));
        let mut cross_chunk_edges = agglomeration.cross_chunk_edges.clone();
        let dropped_cross = cross_chunk_edges.remove_keys(&keys);
        for edge in dropped.into_iter().chain(dropped_cross) {
            removed.entry(edge.key()).or_insert(edge);
        }

        let mut supervoxels = agglomeration.supervoxels.clone();
        supervoxels.sort();
        supervoxels.dedup();
        let pairs = kept.iter().map(|edge| (edge.source, edge.sink));
        let chunk = ctx.codec().chunk_id(*level2)?;

        for members in connected_components(&supervoxels, pairs)? {
            let member_set: BTreeSet<NodeId> = members.iter().copied().collect();
            let new_id = ctx.allocate(chunk).await?;
            let in_chunk_edges = kept
                .iter()
                .filter(|edge| member_set.contains(&edge.source))
                .copied()
                .collect();
            let component_cross = cross_chunk_edges.filter_sources(|sv| member_set.contains(&sv));

            for supervoxel in &members {
                ctx.set_parent(*supervoxel, new_id);
            }
            ctx.add_pending(
                new_id,
                PendingNode {
                    children: members,
                    cross_chunk_edges: component_cross,
                    in_chunk_edges: Some(in_chunk_edges),
                },
            );
            new_level2_ids.push(new_id);
        }
    }

    ctx.mark_old(&touched).await?;
    parents::finish(ctx, new_level2_ids, removed.into_values().collect()).await
}

//! Multicut Solver
//!
//! Chooses the atomic edges a multicut removes. The solver only reads: it
//! extracts the level-2 agglomerations of one root whose chunks intersect the
//! padded bounding box of the source and sink coordinates, builds the local
//! supervoxel graph and runs a minimum s-t cut over it. The chosen edges are
//! then removed by the edit engine exactly like a manual split.

mod mincut;

pub use mincut::{LocalMincutGraph, MincutResult};

use crate::config::MulticutConfig;
use crate::models::{AtomicEdge, BoundingBox, NodeId, VoxelCoord};
use crate::services::graph::subgraph_edges;
use crate::services::{ChunkedGraph, GraphResult};
use chrono::{DateTime, Utc};

/// Terminals and geometry of one multicut
#[derive(Debug, Clone, Copy)]
pub struct MulticutRequest<'a> {
    pub source_ids: &'a [NodeId],
    pub sink_ids: &'a [NodeId],
    pub source_coords: &'a [VoxelCoord],
    pub sink_coords: &'a [VoxelCoord],
    pub bbox_offset: VoxelCoord,
}

impl MulticutRequest<'_> {
    /// Padded box around every terminal coordinate; `None` without coordinates
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let points: Vec<VoxelCoord> = self
            .source_coords
            .iter()
            .chain(self.sink_coords)
            .copied()
            .collect();
        BoundingBox::around(&points, self.bbox_offset)
    }
}

/// Edges a multicut would remove and the resulting supervoxel partition
#[derive(Debug, Clone, PartialEq)]
pub struct MulticutPreview {
    pub root_id: NodeId,
    pub removed_edges: Vec<AtomicEdge>,
    pub source_side: Vec<NodeId>,
    pub sink_side: Vec<NodeId>,
    /// Supervoxels in the local subgraph
    pub node_count: usize,
    /// Atomic edges in the local subgraph
    pub edge_count: usize,
}

/// Solve a multicut inside `root_id` as of `at_time`
pub async fn compute_multicut(
    graph: &ChunkedGraph,
    root_id: NodeId,
    request: &MulticutRequest<'_>,
    options: &MulticutConfig,
    at_time: Option<DateTime<Utc>>,
) -> GraphResult<MulticutPreview> {
    let bbox = request.bounding_box();
    let agglomerations = graph
        .get_subgraph_agglomerations(root_id, bbox.as_ref(), at_time)
        .await?;
    let edges = subgraph_edges(agglomerations.values());
    let supervoxels = agglomerations
        .values()
        .flat_map(|agg| agg.supervoxels.iter().copied());

    let local = LocalMincutGraph::new(supervoxels, &edges, request.source_ids, request.sink_ids)?;
    let result = local.compute(options)?;

    tracing::debug!(
        "Multicut in {}: {} supervoxel(s), {} edge(s), {} removed",
        root_id,
        local.node_count(),
        local.edge_count(),
        result.removed_edges.len()
    );

    Ok(MulticutPreview {
        root_id,
        removed_edges: result.removed_edges,
        source_side: result.source_side,
        sink_side: result.sink_side,
        node_count: local.node_count(),
        edge_count: local.edge_count(),
    })
}

//! Chunked Graph Service
//!
//! `ChunkedGraph` ties the versioned store, the ID codec and the graph
//! configuration together and exposes the read side of the graph: root
//! resolution, hierarchy traversal and local subgraph extraction. Edits go
//! through [`crate::operations::Operation::execute`], which borrows the
//! service for its store, codec and lock manager.
//!
//! # Root resolution
//!
//! A node's root as of time `t` is found by repeatedly replacing the node
//! with its `Parent` as of `t`. History is immutable, so walking from a
//! superseded node still ends at the root that was current when the node was.
//! `assert_roots` turns that silent staleness into an error.

use crate::config::GraphConfig;
use crate::db::{GraphEvent, VersionedStore};
use crate::models::{
    ranges_overlap, Agglomeration, AtomicEdge, BoundingBox, ChunkId, Column, EdgeKey, IdCodec,
    IdError, NodeCells, NodeId,
};
use crate::services::error::{FatalError, GraphError, GraphResult, PreconditionError};
use crate::services::root_lock::RootLockManager;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the domain event channel
const GRAPH_EVENT_CHANNEL_CAPACITY: usize = 128;

/// Core service for reading and editing one chunked graph
///
/// # Examples
///
/// ```no_run
/// use chunkgraph_core::config::GraphConfig;
/// use chunkgraph_core::db::InMemoryStore;
/// use chunkgraph_core::services::ChunkedGraph;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let graph = ChunkedGraph::new(GraphConfig::default(), Arc::new(InMemoryStore::new()))?;
///     let supervoxels = graph.create_supervoxels([0, 0, 0], 2).await?;
///     let root = graph.get_root(supervoxels[0], None, None).await?;
///     println!("{} belongs to {}", supervoxels[0], root);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ChunkedGraph {
    store: Arc<dyn VersionedStore>,
    codec: IdCodec,
    config: GraphConfig,
    lock_manager: RootLockManager,
    event_tx: broadcast::Sender<GraphEvent>,
}

impl ChunkedGraph {
    /// Create a graph service over `store`
    ///
    /// Fails with a fatal error if the configuration is invalid or leaves a
    /// layer with too few sequence bits.
    pub fn new(config: GraphConfig, store: Arc<dyn VersionedStore>) -> GraphResult<Self> {
        config
            .validate()
            .map_err(|reason| GraphError::Fatal(FatalError::InvalidConfiguration(reason)))?;
        let codec = IdCodec::new(&config)?;
        let lock_manager = RootLockManager::new(store.clone(), config.lock.clone());
        let (event_tx, _) = broadcast::channel(GRAPH_EVENT_CHANNEL_CAPACITY);

        tracing::info!(
            "Opened chunked graph '{}' ({} layers, fan-out {}, {:?} chunks)",
            config.graph_id,
            config.layer_count,
            config.fan_out,
            config.chunk_counts
        );

        Ok(Self {
            store,
            codec,
            config,
            lock_manager,
            event_tx,
        })
    }

    pub fn store(&self) -> &Arc<dyn VersionedStore> {
        &self.store
    }

    pub fn codec(&self) -> &IdCodec {
        &self.codec
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn lock_manager(&self) -> &RootLockManager {
        &self.lock_manager
    }

    pub fn layer_count(&self) -> u8 {
        self.codec.layer_count()
    }

    /// Subscribe to commit and remesh events
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: GraphEvent) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Issue a fresh node id in `chunk`
    ///
    /// Running out of sequence numbers for a chunk is fatal: ids are never
    /// reused, so the chunk cannot take new nodes.
    pub async fn allocate_node_id(&self, chunk: ChunkId) -> GraphResult<NodeId> {
        let sequence = self.store.new_sequence(chunk).await?;
        self.node_id_for_sequence(chunk, sequence)
    }

    /// Issue `count` fresh node ids in `chunk`
    pub async fn allocate_node_ids(&self, chunk: ChunkId, count: usize) -> GraphResult<Vec<NodeId>> {
        let sequences = self.store.new_sequence_batch(chunk, count).await?;
        sequences
            .into_iter()
            .map(|sequence| self.node_id_for_sequence(chunk, sequence))
            .collect()
    }

    fn node_id_for_sequence(&self, chunk: ChunkId, sequence: u64) -> GraphResult<NodeId> {
        match self.codec.node_in_chunk(chunk, sequence) {
            Ok(id) => Ok(id),
            Err(IdError::SequenceOverflow { .. }) => Err(FatalError::IdSpaceExhausted {
                chunk_id: chunk,
                sequence,
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    //
    // HIERARCHY READS
    //

    pub async fn get_parent(
        &self,
        node_id: NodeId,
        at_time: Option<DateTime<Utc>>,
    ) -> GraphResult<Option<NodeId>> {
        let cells = self
            .store
            .read_node(node_id, &[Column::Parent], at_time)
            .await?;
        Ok(cells.parent())
    }

    pub async fn get_parents(
        &self,
        node_ids: &[NodeId],
        at_time: Option<DateTime<Utc>>,
    ) -> GraphResult<Vec<Option<NodeId>>> {
        let cells = self
            .store
            .read_nodes(node_ids, &[Column::Parent], at_time)
            .await?;
        Ok(node_ids
            .iter()
            .map(|id| cells.get(id).and_then(NodeCells::parent))
            .collect())
    }

    pub async fn get_children(
        &self,
        node_id: NodeId,
        at_time: Option<DateTime<Utc>>,
    ) -> GraphResult<Vec<NodeId>> {
        let cells = self
            .store
            .read_node(node_id, &[Column::Children], at_time)
            .await?;
        Ok(cells.children().map(<[NodeId]>::to_vec).unwrap_or_default())
    }

    /// Every ancestor of `node_id`, nearest first
    pub async fn get_all_parents(
        &self,
        node_id: NodeId,
        at_time: Option<DateTime<Utc>>,
    ) -> GraphResult<Vec<NodeId>> {
        let mut ancestors = Vec::new();
        let mut current = node_id;
        while let Some(parent) = self.get_parent(current, at_time).await? {
            if parent.layer() <= current.layer() {
                return Err(GraphError::corrupt(
                    current,
                    format!("parent {} is not above layer {}", parent, current.layer()),
                ));
            }
            ancestors.push(parent);
            current = parent;
        }
        Ok(ancestors)
    }

    /// Every supervoxel below `node_id`
    pub async fn get_leaves(
        &self,
        node_id: NodeId,
        at_time: Option<DateTime<Utc>>,
    ) -> GraphResult<Vec<NodeId>> {
        let mut frontier = vec![node_id];
        let mut leaves = Vec::new();
        while !frontier.is_empty() {
            let (atomic, composite): (Vec<NodeId>, Vec<NodeId>) =
                frontier.into_iter().partition(|id| id.layer() <= 1);
            leaves.extend(atomic);
            if composite.is_empty() {
                break;
            }
            let cells = self
                .store
                .read_nodes(&composite, &[Column::Children], at_time)
                .await?;
            frontier = cells
                .values()
                .flat_map(|c| c.children().unwrap_or(&[]).iter().copied())
                .collect();
        }
        leaves.sort();
        Ok(leaves)
    }

    //
    // ROOT RESOLUTION
    //

    /// Root of `node_id` as of `at_time`, or its ancestor at `stop_layer`
    pub async fn get_root(
        &self,
        node_id: NodeId,
        at_time: Option<DateTime<Utc>>,
        stop_layer: Option<u8>,
    ) -> GraphResult<NodeId> {
        let roots = self
            .get_roots(&[node_id], at_time, stop_layer, false)
            .await?;
        roots
            .into_iter()
            .next()
            .ok_or_else(|| PreconditionError::UnknownNode { node_id }.into())
    }

    /// Batched root resolution, one store round trip per layer
    ///
    /// With `assert_roots`, every walk must end at a node of exactly
    /// `min(stop_layer, layer_count)`; when that is the root layer the node
    /// must also not have been superseded as of `at_time`.
    pub async fn get_roots(
        &self,
        node_ids: &[NodeId],
        at_time: Option<DateTime<Utc>>,
        stop_layer: Option<u8>,
        assert_roots: bool,
    ) -> GraphResult<Vec<NodeId>> {
        let stop_layer = stop_layer
            .unwrap_or(self.layer_count())
            .min(self.layer_count());

        let mut current: Vec<NodeId> = node_ids.to_vec();
        let mut done: Vec<bool> = current.iter().map(|id| id.layer() >= stop_layer).collect();

        while done.iter().any(|d| !d) {
            let pending: Vec<NodeId> = current
                .iter()
                .zip(&done)
                .filter(|(_, d)| !**d)
                .map(|(id, _)| *id)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let cells = self
                .store
                .read_nodes(&pending, &[Column::Parent], at_time)
                .await?;

            for (index, id) in current.iter_mut().enumerate() {
                if done[index] {
                    continue;
                }
                match cells.get(&*id).and_then(NodeCells::parent) {
                    Some(parent) => {
                        if parent.layer() <= id.layer() {
                            return Err(GraphError::corrupt(
                                *id,
                                format!("parent {} is not above layer {}", parent, id.layer()),
                            ));
                        }
                        *id = parent;
                        done[index] = parent.layer() >= stop_layer;
                    }
                    None => {
                        if id.layer() == 1 {
                            return Err(PreconditionError::UnknownNode { node_id: *id }.into());
                        }
                        done[index] = true;
                    }
                }
            }
        }

        if assert_roots {
            self.assert_roots(node_ids, &current, at_time, stop_layer)
                .await?;
        }
        Ok(current)
    }

    async fn assert_roots(
        &self,
        node_ids: &[NodeId],
        reached: &[NodeId],
        at_time: Option<DateTime<Utc>>,
        expected_layer: u8,
    ) -> GraphResult<()> {
        for (node_id, reached) in node_ids.iter().zip(reached) {
            if reached.layer() != expected_layer {
                return Err(PreconditionError::NotARoot {
                    node_id: *node_id,
                    reached: *reached,
                    layer: reached.layer(),
                    expected_layer,
                }
                .into());
            }
        }

        if expected_layer == self.layer_count() {
            let unique: Vec<NodeId> = reached.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
            let cells = self
                .store
                .read_nodes(&unique, &[Column::NewParent], at_time)
                .await?;
            for (node_id, reached) in node_ids.iter().zip(reached) {
                if cells.get(reached).and_then(NodeCells::new_parents).is_some() {
                    return Err(PreconditionError::SupersededRoot {
                        node_id: *node_id,
                        reached: *reached,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Whether `root_id` is a root that has not been superseded as of `at_time`
    pub async fn is_latest_root(
        &self,
        root_id: NodeId,
        at_time: Option<DateTime<Utc>>,
    ) -> GraphResult<bool> {
        if root_id.layer() != self.layer_count() {
            return Ok(false);
        }
        let cells = self
            .store
            .read_node(root_id, &[Column::Children, Column::NewParent], at_time)
            .await?;
        Ok(cells.children().is_some() && cells.new_parents().is_none())
    }

    /// Roots that directly replaced `root_id`
    pub async fn get_new_roots(
        &self,
        root_id: NodeId,
        at_time: Option<DateTime<Utc>>,
    ) -> GraphResult<Vec<NodeId>> {
        let cells = self
            .store
            .read_node(root_id, &[Column::NewParent], at_time)
            .await?;
        Ok(cells.new_parents().map(<[NodeId]>::to_vec).unwrap_or_default())
    }

    /// Roots that `root_id` directly replaced
    pub async fn get_former_roots(
        &self,
        root_id: NodeId,
        at_time: Option<DateTime<Utc>>,
    ) -> GraphResult<Vec<NodeId>> {
        let cells = self
            .store
            .read_node(root_id, &[Column::FormerParent], at_time)
            .await?;
        Ok(cells
            .former_parents()
            .map(<[NodeId]>::to_vec)
            .unwrap_or_default())
    }

    /// Follow `NewParent` links from `root_id` to the roots current at `at_time`
    pub async fn get_latest_roots(
        &self,
        root_id: NodeId,
        at_time: Option<DateTime<Utc>>,
    ) -> GraphResult<Vec<NodeId>> {
        let mut latest = BTreeSet::new();
        let mut seen = HashSet::new();
        let mut frontier = vec![root_id];
        while let Some(root) = frontier.pop() {
            if !seen.insert(root) {
                continue;
            }
            let newer = self.get_new_roots(root, at_time).await?;
            if newer.is_empty() {
                latest.insert(root);
            } else {
                frontier.extend(newer);
            }
        }
        Ok(latest.into_iter().collect())
    }

    //
    // CHUNK AND SUBGRAPH READS
    //

    /// Every row stored in one chunk
    pub async fn read_chunk(
        &self,
        chunk: ChunkId,
        columns: &[Column],
        at_time: Option<DateTime<Utc>>,
    ) -> GraphResult<BTreeMap<NodeId, NodeCells>> {
        let (start, end) = self.codec.chunk_id_range(chunk)?;
        Ok(self.store.read_range(start, end, columns, at_time).await?)
    }

    /// Level-2 views (supervoxels, in-chunk and cross-chunk edges)
    pub async fn get_agglomerations(
        &self,
        level2_ids: &[NodeId],
        at_time: Option<DateTime<Utc>>,
    ) -> GraphResult<BTreeMap<NodeId, Agglomeration>> {
        let cells = self
            .store
            .read_nodes(
                level2_ids,
                &[
                    Column::Children,
                    Column::InChunkEdges,
                    Column::CrossChunkEdges,
                ],
                at_time,
            )
            .await?;

        let mut agglomerations = BTreeMap::new();
        for (id, cells) in cells {
            if id.layer() != 2 {
                return Err(GraphError::corrupt(id, "agglomerations are level-2 nodes"));
            }
            let supervoxels = cells
                .children()
                .ok_or_else(|| GraphError::corrupt(id, "level-2 node without children"))?
                .to_vec();
            agglomerations.insert(
                id,
                Agglomeration {
                    node_id: id,
                    supervoxels,
                    in_chunk_edges: cells.in_chunk_edges().map(<[_]>::to_vec).unwrap_or_default(),
                    cross_chunk_edges: cells.cross_chunk_edges().cloned().unwrap_or_default(),
                },
            );
        }
        Ok(agglomerations)
    }

    /// Level-2 agglomerations under `root_id` whose chunks intersect `bbox`
    pub async fn get_subgraph_agglomerations(
        &self,
        root_id: NodeId,
        bbox: Option<&BoundingBox>,
        at_time: Option<DateTime<Utc>>,
    ) -> GraphResult<BTreeMap<NodeId, Agglomeration>> {
        let bbox_range = bbox.map(|b| b.chunk_range(self.config.chunk_size));
        let mut frontier = vec![root_id];
        let mut level2 = Vec::new();

        while !frontier.is_empty() {
            let mut next = Vec::new();
            let composite: Vec<NodeId> = frontier
                .into_iter()
                .filter(|id| {
                    if id.layer() == 2 {
                        level2.push(*id);
                        false
                    } else {
                        id.layer() > 2
                    }
                })
                .collect();
            if composite.is_empty() {
                break;
            }
            let cells = self
                .store
                .read_nodes(&composite, &[Column::Children], at_time)
                .await?;
            for child in cells.values().flat_map(|c| c.children().unwrap_or(&[])) {
                if let Some(range) = bbox_range {
                    let coord = self.codec.chunk_coord(*child)?;
                    let extent = self
                        .codec
                        .chunk_extent_on_base_grid(child.layer(), coord)?;
                    if !ranges_overlap(extent, range) {
                        continue;
                    }
                }
                next.push(*child);
            }
            frontier = next;
        }

        self.get_agglomerations(&level2, at_time).await
    }

    /// Atomic edges among the supervoxels of the local subgraph of `root_id`
    pub async fn get_subgraph_edges(
        &self,
        root_id: NodeId,
        bbox: Option<&BoundingBox>,
        at_time: Option<DateTime<Utc>>,
    ) -> GraphResult<Vec<AtomicEdge>> {
        let agglomerations = self
            .get_subgraph_agglomerations(root_id, bbox, at_time)
            .await?;
        Ok(subgraph_edges(agglomerations.values()))
    }
}

/// Deduplicated edges whose endpoints both lie in `agglomerations`
pub(crate) fn subgraph_edges<'a>(
    agglomerations: impl Iterator<Item = &'a Agglomeration> + Clone,
) -> Vec<AtomicEdge> {
    let supervoxels: HashSet<NodeId> = agglomerations
        .clone()
        .flat_map(|agg| agg.supervoxels.iter().copied())
        .collect();
    let mut edges: BTreeMap<EdgeKey, AtomicEdge> = BTreeMap::new();
    for agg in agglomerations {
        for edge in agg.all_edges() {
            if supervoxels.contains(&edge.source) && supervoxels.contains(&edge.sink) {
                edges.entry(edge.key()).or_insert(*edge);
            }
        }
    }
    edges.into_values().collect()
}

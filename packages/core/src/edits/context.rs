//! Per-edit mutation context
//!
//! Everything an edit learns or creates lives here and nowhere else: rows
//! read from the store (as of the lock timestamp), nodes created by the edit,
//! the child -> new parent overlay, and the set of superseded ancestors. A
//! context belongs to exactly one `execute()` call and is consumed when the
//! edit produces its rows.

use crate::models::{
    Agglomeration, AtomicEdge, ChunkId, Column, CrossChunkEdges, IdCodec, NodeCells, NodeId,
};
use crate::services::{ChunkedGraph, GraphError, GraphResult};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Node created by the current edit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingNode {
    pub children: Vec<NodeId>,
    pub cross_chunk_edges: CrossChunkEdges,
    /// Present on level-2 nodes only
    pub in_chunk_edges: Option<Vec<AtomicEdge>>,
}

pub struct MutationContext<'a> {
    graph: &'a ChunkedGraph,
    timestamp: DateTime<Utc>,
    rows: HashMap<NodeId, NodeCells>,
    pub(crate) pending: BTreeMap<NodeId, PendingNode>,
    pub(crate) reparented: BTreeMap<NodeId, NodeId>,
    pub(crate) old_ids: BTreeSet<NodeId>,
}

impl<'a> MutationContext<'a> {
    /// Context reading `graph` as of `timestamp`
    pub fn new(graph: &'a ChunkedGraph, timestamp: DateTime<Utc>) -> Self {
        Self {
            graph,
            timestamp,
            rows: HashMap::new(),
            pending: BTreeMap::new(),
            reparented: BTreeMap::new(),
            old_ids: BTreeSet::new(),
        }
    }

    pub fn codec(&self) -> &'a IdCodec {
        self.graph.codec()
    }

    pub fn layer_count(&self) -> u8 {
        self.graph.layer_count()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Fetch rows not read yet into the cache
    pub async fn prefetch(&mut self, ids: &[NodeId]) -> GraphResult<()> {
        let missing: Vec<NodeId> = ids
            .iter()
            .filter(|id| !self.rows.contains_key(id) && !self.pending.contains_key(id))
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let read = self
            .graph
            .store()
            .read_nodes(&missing, &Column::ALL, Some(self.timestamp))
            .await?;
        self.rows.extend(read);
        Ok(())
    }

    async fn cells(&mut self, id: NodeId) -> GraphResult<&NodeCells> {
        self.prefetch(&[id]).await?;
        self.rows
            .get(&id)
            .ok_or_else(|| GraphError::corrupt(id, "row missing from read"))
    }

    /// Parent as stored before this edit
    pub async fn stored_parent(&mut self, id: NodeId) -> GraphResult<Option<NodeId>> {
        Ok(self.cells(id).await?.parent())
    }

    /// Parent after the changes made so far by this edit
    pub async fn parent(&mut self, id: NodeId) -> GraphResult<Option<NodeId>> {
        if let Some(parent) = self.reparented.get(&id) {
            return Ok(Some(*parent));
        }
        if self.pending.contains_key(&id) {
            return Ok(None);
        }
        self.stored_parent(id).await
    }

    pub async fn children(&mut self, id: NodeId) -> GraphResult<Vec<NodeId>> {
        if let Some(node) = self.pending.get(&id) {
            return Ok(node.children.clone());
        }
        Ok(self
            .cells(id)
            .await?
            .children()
            .map(<[NodeId]>::to_vec)
            .unwrap_or_default())
    }

    pub async fn cross_chunk_edges(&mut self, id: NodeId) -> GraphResult<CrossChunkEdges> {
        if let Some(node) = self.pending.get(&id) {
            return Ok(node.cross_chunk_edges.clone());
        }
        Ok(self
            .cells(id)
            .await?
            .cross_chunk_edges()
            .cloned()
            .unwrap_or_default())
    }

    /// Stored level-2 view of `id`
    pub async fn agglomeration(&mut self, id: NodeId) -> GraphResult<Agglomeration> {
        if id.layer() != 2 {
            return Err(GraphError::corrupt(id, "agglomerations are level-2 nodes"));
        }
        let cells = self.cells(id).await?;
        let supervoxels = cells
            .children()
            .ok_or_else(|| GraphError::corrupt(id, "level-2 node without children"))?
            .to_vec();
        Ok(Agglomeration {
            node_id: id,
            supervoxels,
            in_chunk_edges: cells.in_chunk_edges().map(<[_]>::to_vec).unwrap_or_default(),
            cross_chunk_edges: cells.cross_chunk_edges().cloned().unwrap_or_default(),
        })
    }

    /// Ancestor of `id` at `layer`, seen through this edit's changes
    pub async fn ancestor_at(&mut self, id: NodeId, layer: u8) -> GraphResult<NodeId> {
        let mut current = id;
        while current.layer() < layer {
            current = self.parent(current).await?.ok_or_else(|| {
                GraphError::corrupt(current, format!("no ancestor at layer {} for {}", layer, id))
            })?;
        }
        if current.layer() != layer {
            return Err(GraphError::corrupt(
                current,
                format!("hierarchy skips layer {} above {}", layer, id),
            ));
        }
        Ok(current)
    }

    /// Record `ids` and every stored ancestor of them as superseded
    pub async fn mark_old(&mut self, ids: &[NodeId]) -> GraphResult<()> {
        let mut frontier: Vec<NodeId> = ids.to_vec();
        while !frontier.is_empty() {
            self.prefetch(&frontier).await?;
            let mut next = Vec::new();
            for id in frontier {
                if !self.old_ids.insert(id) {
                    continue;
                }
                if let Some(parent) = self.stored_parent(id).await? {
                    next.push(parent);
                }
            }
            frontier = next;
        }
        Ok(())
    }

    pub fn old_ids_at(&self, layer: u8) -> Vec<NodeId> {
        self.old_ids
            .iter()
            .filter(|id| id.layer() == layer)
            .copied()
            .collect()
    }

    pub async fn allocate(&self, chunk: ChunkId) -> GraphResult<NodeId> {
        self.graph.allocate_node_id(chunk).await
    }

    pub fn add_pending(&mut self, id: NodeId, node: PendingNode) {
        self.pending.insert(id, node);
    }

    pub fn set_parent(&mut self, child: NodeId, parent: NodeId) {
        self.reparented.insert(child, parent);
    }
}

//! Atomic edges and per-layer cross-chunk edge maps

use super::node_id::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Unordered supervoxel pair used to identify an edge irrespective of direction
pub type EdgeKey = (NodeId, NodeId);

/// Edge between two supervoxels with its affinity
///
/// Edges stored on a node row are oriented: `source` is the supervoxel that
/// belongs to the node, `sink` is the neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtomicEdge {
    pub source: NodeId,
    pub sink: NodeId,
    pub affinity: f32,
}

impl AtomicEdge {
    pub fn new(source: NodeId, sink: NodeId, affinity: f32) -> Self {
        Self {
            source,
            sink,
            affinity,
        }
    }

    /// Direction-independent identity of the edge
    pub fn key(&self) -> EdgeKey {
        edge_key(self.source, self.sink)
    }

    /// Same edge oriented so that `source == from`
    pub fn oriented_from(&self, from: NodeId) -> Self {
        if self.source == from {
            *self
        } else {
            Self::new(self.sink, self.source, self.affinity)
        }
    }
}

pub fn edge_key(a: NodeId, b: NodeId) -> EdgeKey {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Cross-chunk edges of a node, grouped by the layer at which they resolve
///
/// Key `L` holds edges whose endpoints' ancestors at layer `L` sit in
/// different chunks but share a parent at `L + 1`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossChunkEdges(BTreeMap<u8, Vec<AtomicEdge>>);

impl CrossChunkEdges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|edges| edges.is_empty())
    }

    /// Edges resolving at exactly `layer`
    pub fn at(&self, layer: u8) -> &[AtomicEdge] {
        self.0.get(&layer).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn layers(&self) -> impl Iterator<Item = u8> + '_ {
        self.0
            .iter()
            .filter(|(_, edges)| !edges.is_empty())
            .map(|(layer, _)| *layer)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &AtomicEdge)> + '_ {
        self.0
            .iter()
            .flat_map(|(layer, edges)| edges.iter().map(move |edge| (*layer, edge)))
    }

    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Insert an edge unless the same supervoxel pair is already present at `layer`
    pub fn insert(&mut self, layer: u8, edge: AtomicEdge) -> bool {
        let edges = self.0.entry(layer).or_default();
        let key = edge.key();
        if edges.iter().any(|existing| existing.key() == key) {
            return false;
        }
        edges.push(edge);
        edges.sort_by_key(|e| (e.source, e.sink));
        true
    }

    /// Union with another map, keeping only layers `>= min_layer`
    pub fn merge_from(&mut self, other: &CrossChunkEdges, min_layer: u8) {
        for (layer, edge) in other.iter() {
            if layer >= min_layer {
                self.insert(layer, *edge);
            }
        }
    }

    /// Drop every edge whose key is in `keys`, returning the dropped edges
    pub fn remove_keys(&mut self, keys: &BTreeSet<EdgeKey>) -> Vec<AtomicEdge> {
        let mut removed = Vec::new();
        for edges in self.0.values_mut() {
            edges.retain(|edge| {
                if keys.contains(&edge.key()) {
                    removed.push(*edge);
                    false
                } else {
                    true
                }
            });
        }
        self.0.retain(|_, edges| !edges.is_empty());
        removed
    }

    /// Subset of edges whose source satisfies `keep`
    pub fn filter_sources(&self, keep: impl Fn(NodeId) -> bool) -> CrossChunkEdges {
        let mut filtered = CrossChunkEdges::new();
        for (layer, edge) in self.iter() {
            if keep(edge.source) {
                filtered.insert(layer, *edge);
            }
        }
        filtered
    }
}

impl FromIterator<(u8, AtomicEdge)> for CrossChunkEdges {
    fn from_iter<I: IntoIterator<Item = (u8, AtomicEdge)>>(iter: I) -> Self {
        let mut edges = CrossChunkEdges::new();
        for (layer, edge) in iter {
            edges.insert(layer, edge);
        }
        edges
    }
}

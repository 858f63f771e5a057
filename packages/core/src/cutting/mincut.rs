//! Local minimum s-t edge cut over supervoxels
//!
//! Sources hang off a super-source and sinks off a super-sink through
//! arcs of unbounded capacity; every atomic edge becomes a pair of opposed
//! arcs with the edge's capacity. The cut is read off the residual network
//! after Edmonds-Karp max-flow.
//!
//! Capacities are fixed-point integers derived from affinities so repeated
//! runs over the same input produce the same flow and the same cut.

use crate::config::MulticutConfig;
use crate::models::{AtomicEdge, EdgeKey, NodeId};
use crate::services::{GraphError, GraphResult, PostconditionError, PreconditionError};
use petgraph::algo::astar;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Fixed-point scale applied to affinities
const CAPACITY_SCALE: f64 = 1_000_000.0;

/// Affinities above this are clamped before scaling
const MAX_AFFINITY: f64 = 1_000_000.0;

/// Capacity of terminal arcs
const INFINITE_CAPACITY: u64 = u64::MAX / 4;

/// Keeps path weights finite for zero affinities
const PATH_WEIGHT_EPSILON: f64 = 1e-6;

/// Capacity of an atomic edge: scaled affinity plus one, so that every cut
/// edge has a positive cost
fn edge_capacity(affinity: f32) -> u64 {
    let clamped = f64::from(affinity).clamp(0.0, MAX_AFFINITY);
    (clamped * CAPACITY_SCALE).round() as u64 + 1
}

#[derive(Debug, Clone, Copy)]
struct FlowArc {
    to: usize,
    residual: u64,
    reverse: usize,
}

/// Residual network for Edmonds-Karp
#[derive(Debug, Clone)]
struct FlowNetwork {
    arcs: Vec<Vec<FlowArc>>,
}

impl FlowNetwork {
    fn new(vertex_count: usize) -> Self {
        Self {
            arcs: vec![Vec::new(); vertex_count],
        }
    }

    fn add_arc_pair(&mut self, u: usize, v: usize, forward: u64, backward: u64) {
        let reverse_in_v = self.arcs[v].len();
        let reverse_in_u = self.arcs[u].len();
        self.arcs[u].push(FlowArc {
            to: v,
            residual: forward,
            reverse: reverse_in_v,
        });
        self.arcs[v].push(FlowArc {
            to: u,
            residual: backward,
            reverse: reverse_in_u,
        });
    }

    /// Shortest augmenting path as (vertex, arc index) steps, if any
    fn augmenting_path(&self, source: usize, sink: usize) -> Option<Vec<(usize, usize)>> {
        let mut previous: Vec<Option<(usize, usize)>> = vec![None; self.arcs.len()];
        let mut visited = vec![false; self.arcs.len()];
        let mut queue = VecDeque::from([source]);
        visited[source] = true;

        while let Some(u) = queue.pop_front() {
            if u == sink {
                break;
            }
            for (index, arc) in self.arcs[u].iter().enumerate() {
                if arc.residual > 0 && !visited[arc.to] {
                    visited[arc.to] = true;
                    previous[arc.to] = Some((u, index));
                    queue.push_back(arc.to);
                }
            }
        }

        if !visited[sink] {
            return None;
        }
        let mut path = Vec::new();
        let mut current = sink;
        while let Some((u, index)) = previous[current] {
            path.push((u, index));
            current = u;
        }
        path.reverse();
        Some(path)
    }

    fn max_flow(&mut self, source: usize, sink: usize) -> u64 {
        let mut total: u64 = 0;
        while let Some(path) = self.augmenting_path(source, sink) {
            let bottleneck = path
                .iter()
                .map(|(u, index)| self.arcs[*u][*index].residual)
                .min()
                .unwrap_or(0);
            if bottleneck == 0 {
                break;
            }
            for (u, index) in path {
                let FlowArc { to, reverse, .. } = self.arcs[u][index];
                self.arcs[u][index].residual -= bottleneck;
                self.arcs[to][reverse].residual = self.arcs[to][reverse].residual.saturating_add(bottleneck);
            }
            total = total.saturating_add(bottleneck);
        }
        total
    }

    /// Vertices reachable from `source` in the residual network
    fn reachable_from(&self, source: usize) -> Vec<bool> {
        let mut seen = vec![false; self.arcs.len()];
        let mut queue = VecDeque::from([source]);
        seen[source] = true;
        while let Some(u) = queue.pop_front() {
            for arc in &self.arcs[u] {
                if arc.residual > 0 && !seen[arc.to] {
                    seen[arc.to] = true;
                    queue.push_back(arc.to);
                }
            }
        }
        seen
    }

    /// Vertices that can reach `sink` in the residual network
    fn reaching(&self, sink: usize) -> Vec<bool> {
        let mut seen = vec![false; self.arcs.len()];
        let mut queue = VecDeque::from([sink]);
        seen[sink] = true;
        while let Some(u) = queue.pop_front() {
            for arc in &self.arcs[u] {
                let into_u = self.arcs[arc.to][arc.reverse].residual;
                if into_u > 0 && !seen[arc.to] {
                    seen[arc.to] = true;
                    queue.push_back(arc.to);
                }
            }
        }
        seen
    }
}

/// Outcome of a local minimum cut
#[derive(Debug, Clone, PartialEq)]
pub struct MincutResult {
    /// Edges to remove, sorted by key
    pub removed_edges: Vec<AtomicEdge>,
    /// Supervoxels left connected to a source
    pub source_side: Vec<NodeId>,
    /// Supervoxels left connected to a sink
    pub sink_side: Vec<NodeId>,
}

/// Supervoxel graph of one multicut request
#[derive(Debug, Clone)]
pub struct LocalMincutGraph {
    supervoxels: Vec<NodeId>,
    index: HashMap<NodeId, usize>,
    edges: Vec<AtomicEdge>,
    endpoints: Vec<(usize, usize)>,
    sources: Vec<usize>,
    sinks: Vec<usize>,
}

impl LocalMincutGraph {
    /// Build the graph; edges with an endpoint outside `supervoxels` are dropped
    pub fn new(
        supervoxels: impl IntoIterator<Item = NodeId>,
        edges: &[AtomicEdge],
        source_ids: &[NodeId],
        sink_ids: &[NodeId],
    ) -> GraphResult<Self> {
        let supervoxels: Vec<NodeId> = supervoxels
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index: HashMap<NodeId, usize> = supervoxels
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();

        let sources: BTreeSet<NodeId> = source_ids.iter().copied().collect();
        let sinks: BTreeSet<NodeId> = sink_ids.iter().copied().collect();
        if sources.is_empty() || sinks.is_empty() {
            return Err(PreconditionError::MissingTerminals.into());
        }
        let overlap: Vec<NodeId> = sources.intersection(&sinks).copied().collect();
        if !overlap.is_empty() {
            return Err(PreconditionError::SourceSinkOverlap { node_ids: overlap }.into());
        }
        let outside: Vec<NodeId> = sources
            .iter()
            .chain(&sinks)
            .filter(|id| !index.contains_key(id))
            .copied()
            .collect();
        if !outside.is_empty() {
            return Err(PreconditionError::TerminalsOutsideSubgraph { node_ids: outside }.into());
        }

        let mut unique: BTreeSet<EdgeKey> = BTreeSet::new();
        let mut kept_edges = Vec::new();
        let mut endpoints = Vec::new();
        for edge in edges {
            let (Some(&u), Some(&v)) = (index.get(&edge.source), index.get(&edge.sink)) else {
                continue;
            };
            if u == v || !unique.insert(edge.key()) {
                continue;
            }
            kept_edges.push(*edge);
            endpoints.push((u, v));
        }

        Ok(Self {
            sources: sources.iter().map(|id| index[id]).collect(),
            sinks: sinks.iter().map(|id| index[id]).collect(),
            supervoxels,
            index,
            edges: kept_edges,
            endpoints,
        })
    }

    pub fn node_count(&self) -> usize {
        self.supervoxels.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Compute the cut that separates every source from every sink
    pub fn compute(&self, options: &MulticutConfig) -> GraphResult<MincutResult> {
        let mut capacities: Vec<u64> = self
            .edges
            .iter()
            .map(|edge| edge_capacity(edge.affinity))
            .collect();
        if options.path_augment {
            self.augment_team_paths(&mut capacities);
        }

        let n = self.supervoxels.len();
        let (super_source, super_sink) = (n, n + 1);
        let mut network = FlowNetwork::new(n + 2);
        for ((u, v), capacity) in self.endpoints.iter().zip(&capacities) {
            network.add_arc_pair(*u, *v, *capacity, *capacity);
        }
        for source in &self.sources {
            network.add_arc_pair(super_source, *source, INFINITE_CAPACITY, 0);
        }
        for sink in &self.sinks {
            network.add_arc_pair(*sink, super_sink, INFINITE_CAPACITY, 0);
        }

        let flow = network.max_flow(super_source, super_sink);
        if flow == 0 {
            return Err(self.empty_cut());
        }

        let source_reach = network.reachable_from(super_source);
        let mut cut = self.crossing_edges(&source_reach);

        if options.disallow_isolating_cut {
            let isolated = self.isolated_terminals(&cut);
            if !isolated.is_empty() {
                let sink_reach = network.reaching(super_sink);
                let source_side: Vec<bool> = sink_reach.iter().map(|reaches| !reaches).collect();
                let alternative = self.crossing_edges(&source_side);
                if !self.isolated_terminals(&alternative).is_empty() {
                    return Err(PostconditionError::IsolatingCut { node_ids: isolated }.into());
                }
                tracing::debug!(
                    "Source-side minimum cut isolates {:?}; using the sink-side cut",
                    isolated
                );
                cut = alternative;
            }
        }

        if cut.is_empty() {
            return Err(self.empty_cut());
        }
        self.partition(&cut)
    }

    fn empty_cut(&self) -> GraphError {
        PostconditionError::EmptyCut {
            source_ids: self.ids(&self.sources),
            sink_ids: self.ids(&self.sinks),
        }
        .into()
    }

    fn ids(&self, indices: &[usize]) -> Vec<NodeId> {
        indices.iter().map(|i| self.supervoxels[*i]).collect()
    }

    /// Raise capacities along shortest paths inside each terminal team
    ///
    /// Vertices touched by both teams' paths are left alone; forcing them to
    /// one side would pick a winner the affinities do not support.
    fn augment_team_paths(&self, capacities: &mut [u64]) {
        let mut graph: UnGraph<(), f64> = UnGraph::with_capacity(self.supervoxels.len(), self.edges.len());
        for _ in &self.supervoxels {
            graph.add_node(());
        }
        let mut edge_index: HashMap<(usize, usize), usize> = HashMap::new();
        for (i, ((u, v), edge)) in self.endpoints.iter().zip(&self.edges).enumerate() {
            let weight = 1.0 / (f64::from(edge.affinity).max(0.0) + PATH_WEIGHT_EPSILON);
            graph.add_edge(NodeIndex::new(*u), NodeIndex::new(*v), weight);
            edge_index.insert(((*u).min(*v), (*u).max(*v)), i);
        }

        let team_paths = |team: &[usize]| -> (BTreeSet<usize>, Vec<(usize, usize)>) {
            let mut vertices: BTreeSet<usize> = team.iter().copied().collect();
            let mut steps = Vec::new();
            let Some((&first, rest)) = team.split_first() else {
                return (vertices, steps);
            };
            for &goal in rest {
                let found = astar(
                    &graph,
                    NodeIndex::new(first),
                    |node| node == NodeIndex::new(goal),
                    |edge| *edge.weight(),
                    |_| 0.0,
                );
                if let Some((_, path)) = found {
                    vertices.extend(path.iter().map(|node| node.index()));
                    steps.extend(path.windows(2).map(|pair| (pair[0].index(), pair[1].index())));
                }
            }
            (vertices, steps)
        };

        let (source_vertices, source_steps) = team_paths(&self.sources);
        let (sink_vertices, sink_steps) = team_paths(&self.sinks);
        let shared: BTreeSet<usize> = source_vertices.intersection(&sink_vertices).copied().collect();

        let total: u64 = capacities.iter().fold(0u64, |sum, c| sum.saturating_add(*c));
        let raised = total.saturating_add(1).min(INFINITE_CAPACITY - 1);
        for (u, v) in source_steps.into_iter().chain(sink_steps) {
            if shared.contains(&u) || shared.contains(&v) {
                continue;
            }
            if let Some(i) = edge_index.get(&(u.min(v), u.max(v))) {
                capacities[*i] = capacities[*i].max(raised);
            }
        }
    }

    /// Indices of edges whose endpoints lie on different sides
    fn crossing_edges(&self, on_source_side: &[bool]) -> Vec<usize> {
        self.endpoints
            .iter()
            .enumerate()
            .filter(|(_, (u, v))| on_source_side[*u] != on_source_side[*v])
            .map(|(i, _)| i)
            .collect()
    }

    /// Terminals with at least one incident edge, all of which are cut
    fn isolated_terminals(&self, cut: &[usize]) -> Vec<NodeId> {
        let cut: BTreeSet<usize> = cut.iter().copied().collect();
        let mut degree: HashMap<usize, (usize, usize)> = HashMap::new();
        for (i, (u, v)) in self.endpoints.iter().enumerate() {
            for endpoint in [*u, *v] {
                let entry = degree.entry(endpoint).or_default();
                entry.0 += 1;
                if cut.contains(&i) {
                    entry.1 += 1;
                }
            }
        }
        let mut isolated: Vec<NodeId> = self
            .sources
            .iter()
            .chain(&self.sinks)
            .filter(|t| matches!(degree.get(t), Some((total, severed)) if *total > 0 && total == severed))
            .map(|t| self.supervoxels[*t])
            .collect();
        isolated.sort();
        isolated
    }

    /// Components left after removing `cut`, checked for separation
    fn partition(&self, cut: &[usize]) -> GraphResult<MincutResult> {
        let cut: BTreeSet<usize> = cut.iter().copied().collect();
        let mut components = UnionFind::<usize>::new(self.supervoxels.len());
        for (i, (u, v)) in self.endpoints.iter().enumerate() {
            if !cut.contains(&i) {
                components.union(*u, *v);
            }
        }

        let source_roots: BTreeSet<usize> = self.sources.iter().map(|s| components.find(*s)).collect();
        let sink_roots: BTreeSet<usize> = self.sinks.iter().map(|s| components.find(*s)).collect();
        if !source_roots.is_disjoint(&sink_roots) {
            return Err(PostconditionError::CutDidNotSeparate {
                source_ids: self.ids(&self.sources),
                sink_ids: self.ids(&self.sinks),
            }
            .into());
        }

        let side = |roots: &BTreeSet<usize>| -> Vec<NodeId> {
            (0..self.supervoxels.len())
                .filter(|i| roots.contains(&components.find(*i)))
                .map(|i| self.supervoxels[i])
                .collect()
        };

        let mut removed_edges: Vec<AtomicEdge> = cut.iter().map(|i| self.edges[*i]).collect();
        removed_edges.sort_by_key(AtomicEdge::key);
        Ok(MincutResult {
            removed_edges,
            source_side: side(&source_roots),
            sink_side: side(&sink_roots),
        })
    }
}

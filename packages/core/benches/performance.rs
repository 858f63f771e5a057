//! Performance benchmarks for chunkgraph core operations
//!
//! Run with: `cargo bench -p chunkgraph-core`
//!
//! These benchmarks measure critical path performance:
//! - ID encode/decode (every hierarchy read decodes layer and chunk)
//! - Minimum cut on a local supervoxel grid
//! - Merge commit latency including locking and the upward pass
//! - Batched root resolution

use chunkgraph_core::config::{GraphConfig, MulticutConfig};
use chunkgraph_core::cutting::LocalMincutGraph;
use chunkgraph_core::db::InMemoryStore;
use chunkgraph_core::models::{AtomicEdge, IdCodec, NodeId};
use chunkgraph_core::operations::Operation;
use chunkgraph_core::services::ChunkedGraph;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Setup a graph over a fresh in-memory store
fn setup_test_graph() -> ChunkedGraph {
    let store = Arc::new(InMemoryStore::new());
    ChunkedGraph::new(GraphConfig::default(), store).unwrap()
}

/// Square grid of supervoxels with a weak middle column
fn grid_graph(side: u64) -> (Vec<NodeId>, Vec<AtomicEdge>) {
    let id = |x: u64, y: u64| NodeId(1 + y * side + x);
    let nodes: Vec<NodeId> = (0..side)
        .flat_map(|y| (0..side).map(move |x| id(x, y)))
        .collect();
    let mut edges = Vec::new();
    for y in 0..side {
        for x in 0..side {
            if x + 1 < side {
                let affinity = if x + 1 == side / 2 { 0.05 } else { 0.9 };
                edges.push(AtomicEdge::new(id(x, y), id(x + 1, y), affinity));
            }
            if y + 1 < side {
                edges.push(AtomicEdge::new(id(x, y), id(x, y + 1), 0.8));
            }
        }
    }
    (nodes, edges)
}

/// Benchmark ID encode/decode round trips
fn bench_id_codec(c: &mut Criterion) {
    let codec = IdCodec::new(&GraphConfig::default()).unwrap();

    c.bench_function("id_encode_decode", |b| {
        b.iter(|| {
            for sequence in 1..=256u64 {
                let id = codec
                    .encode(2, [sequence % 4, (sequence / 4) % 4, 3], sequence)
                    .unwrap();
                black_box(codec.decode(id).unwrap());
            }
        });
    });

    c.bench_function("parent_chunk_id", |b| {
        let id = codec.encode(1, [3, 2, 1], 42).unwrap();
        b.iter(|| {
            for layer in 2..=codec.layer_count() {
                black_box(codec.parent_chunk_id(black_box(id), layer).unwrap());
            }
        });
    });
}

/// Benchmark minimum cut on growing grids
///
/// Sources sit on the left column, sinks on the right; the weak column in the
/// middle is the expected cut.
fn bench_mincut(c: &mut Criterion) {
    let mut group = c.benchmark_group("mincut_grid");

    for side in [8u64, 16, 32] {
        let (nodes, edges) = grid_graph(side);
        let sources: Vec<NodeId> = (0..side).map(|y| nodes[(y * side) as usize]).collect();
        let sinks: Vec<NodeId> = (0..side)
            .map(|y| nodes[(y * side + side - 1) as usize])
            .collect();

        for path_augment in [false, true] {
            let options = MulticutConfig {
                path_augment,
                ..MulticutConfig::default()
            };
            let label = if path_augment { "augmented" } else { "plain" };
            group.bench_with_input(BenchmarkId::new(label, side * side), &side, |b, _| {
                b.iter(|| {
                    let graph =
                        LocalMincutGraph::new(nodes.iter().copied(), &edges, &sources, &sinks)
                            .unwrap();
                    black_box(graph.compute(&options).unwrap())
                });
            });
        }
    }

    group.finish();
}

/// Benchmark merge commits
///
/// Each iteration merges two fresh supervoxels into a growing object, so the
/// upward pass and lock round trips dominate.
fn bench_merge_commit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("merge_commit");
    group.sample_size(20);

    group.bench_function("chain_in_one_chunk", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let graph = setup_test_graph();
                let supervoxels = graph
                    .create_supervoxels([0, 0, 0], iters as usize + 1)
                    .await
                    .unwrap();

                let start = std::time::Instant::now();
                for pair in supervoxels.windows(2) {
                    black_box(
                        Operation::merge("bench", vec![[pair[0], pair[1]]])
                            .execute(&graph)
                            .await
                            .unwrap(),
                    );
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

/// Benchmark batched root resolution for 1000 supervoxels
fn bench_get_roots(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (graph, supervoxels) = rt.block_on(async {
        let graph = setup_test_graph();
        let mut supervoxels = Vec::new();
        for x in 0..4 {
            for y in 0..4 {
                supervoxels.extend(graph.create_supervoxels([x, y, 0], 64).await.unwrap());
            }
        }
        (graph, supervoxels)
    });

    c.bench_function("get_roots_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(
                    graph
                        .get_roots(&supervoxels[..1000], None, None, false)
                        .await
                        .unwrap(),
                )
            })
        });
    });
}

criterion_group!(
    benches,
    bench_id_codec,
    bench_mincut,
    bench_merge_commit,
    bench_get_roots
);
criterion_main!(benches);

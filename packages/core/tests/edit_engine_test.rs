//! Edit Engine Tests
//!
//! Merges and splits end to end against the in-memory store: hierarchy shape
//! after each edit, cross-chunk edge bookkeeping, the merge/split inverse law
//! and supervoxel conservation across splits.

#[cfg(test)]
mod edit_engine_tests {
    use anyhow::Result;
    use chunkgraph_core::config::GraphConfig;
    use chunkgraph_core::db::{InMemoryStore, VersionedStore};
    use chunkgraph_core::models::{AtomicEdge, Column, LogRecordKind, NodeId};
    use chunkgraph_core::operations::Operation;
    use chunkgraph_core::services::ChunkedGraph;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn create_test_graph() -> Result<(ChunkedGraph, Arc<InMemoryStore>)> {
        init_tracing();
        let store = Arc::new(InMemoryStore::new());
        let graph = ChunkedGraph::new(GraphConfig::default(), store.clone())?;
        Ok((graph, store))
    }

    async fn leaves_of_root(graph: &ChunkedGraph, supervoxel: NodeId) -> Result<BTreeSet<NodeId>> {
        let root = graph.get_root(supervoxel, None, None).await?;
        Ok(graph.get_leaves(root, None).await?.into_iter().collect())
    }

    #[tokio::test]
    async fn test_merge_joins_objects_in_one_chunk() -> Result<()> {
        let (graph, store) = create_test_graph()?;
        let sv = graph.create_supervoxels([0, 0, 0], 2).await?;
        let (old_a, old_b) = (
            graph.get_root(sv[0], None, None).await?,
            graph.get_root(sv[1], None, None).await?,
        );

        let result = Operation::merge("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await?;

        assert_eq!(result.new_root_ids.len(), 1);
        assert_eq!(result.new_level2_ids.len(), 1);
        let root = result.new_root_ids[0];
        assert_eq!(root.layer(), graph.layer_count());
        assert_eq!(graph.get_root(sv[0], None, None).await?, root);
        assert_eq!(graph.get_root(sv[1], None, None).await?, root);

        // both supervoxels now share one level-2 node holding the new edge
        let level2 = graph.get_parent(sv[0], None).await?;
        assert_eq!(level2, Some(result.new_level2_ids[0]));
        assert_eq!(graph.get_parent(sv[1], None).await?, level2);
        let agglomerations = graph.get_agglomerations(&result.new_level2_ids, None).await?;
        let agglomeration = &agglomerations[&result.new_level2_ids[0]];
        assert_eq!(agglomeration.supervoxels, vec![sv[0], sv[1]]);
        assert_eq!(
            agglomeration.in_chunk_edges,
            vec![AtomicEdge::new(sv[0], sv[1], 1.0)]
        );

        // lineage of the superseded roots
        assert_eq!(graph.get_new_roots(old_a, None).await?, vec![root]);
        assert_eq!(graph.get_new_roots(old_b, None).await?, vec![root]);
        let former: BTreeSet<NodeId> = graph.get_former_roots(root, None).await?.into_iter().collect();
        assert_eq!(former, BTreeSet::from([old_a, old_b]));
        assert!(!graph.is_latest_root(old_a, None).await?);
        assert!(graph.is_latest_root(root, None).await?);

        let log = store
            .read_log(result.operation_id)
            .await?
            .expect("merge must be logged");
        assert_eq!(log.kind(false), Some(LogRecordKind::Merge));
        assert_eq!(log.root_ids, vec![root]);
        assert_eq!(log.affinities, Some(vec![1.0]));
        assert_eq!(log.user_id, "alice");
        assert_eq!(store.lock_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_split_inverse_law() -> Result<()> {
        let (graph, _store) = create_test_graph()?;
        let sv = graph.create_supervoxels([1, 1, 0], 2).await?;

        Operation::merge("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await?;
        assert_eq!(leaves_of_root(&graph, sv[0]).await?, BTreeSet::from([sv[0], sv[1]]));

        let result = Operation::split("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await?;
        assert_eq!(result.new_root_ids.len(), 2);
        assert_eq!(result.new_level2_ids.len(), 2);
        assert_eq!(leaves_of_root(&graph, sv[0]).await?, BTreeSet::from([sv[0]]));
        assert_eq!(leaves_of_root(&graph, sv[1]).await?, BTreeSet::from([sv[1]]));
        Ok(())
    }

    #[tokio::test]
    async fn test_split_conserves_supervoxels() -> Result<()> {
        let (graph, store) = create_test_graph()?;
        let sv = graph.create_supervoxels([0, 0, 0], 5).await?;

        // chain 0-1-2-3-4, then cut it in the middle
        let chain: Vec<[NodeId; 2]> = sv.windows(2).map(|pair| [pair[0], pair[1]]).collect();
        Operation::merge("alice", chain).execute(&graph).await?;
        let before = leaves_of_root(&graph, sv[0]).await?;
        assert_eq!(before.len(), 5);

        let result = Operation::split("alice", vec![[sv[2], sv[1]]])
            .execute(&graph)
            .await?;

        let mut seen = BTreeSet::new();
        let mut total = 0;
        for root in &result.new_root_ids {
            let leaves = graph.get_leaves(*root, None).await?;
            total += leaves.len();
            seen.extend(leaves);
        }
        assert_eq!(total, before.len());
        assert_eq!(seen, before);
        assert_eq!(leaves_of_root(&graph, sv[0]).await?, BTreeSet::from([sv[0], sv[1]]));
        assert_eq!(
            leaves_of_root(&graph, sv[4]).await?,
            BTreeSet::from([sv[2], sv[3], sv[4]])
        );

        // the removed edge is logged with its stored affinity
        let log = store.read_log(result.operation_id).await?.expect("split logged");
        assert_eq!(log.removed_edges, Some(vec![[sv[1], sv[2]]]));
        assert_eq!(log.affinities, Some(vec![1.0]));
        Ok(())
    }

    #[tokio::test]
    async fn test_split_that_disconnects_nothing() -> Result<()> {
        let (graph, _store) = create_test_graph()?;
        let sv = graph.create_supervoxels([2, 0, 1], 3).await?;

        // triangle: removing one side keeps it connected
        Operation::merge("alice", vec![[sv[0], sv[1]], [sv[1], sv[2]], [sv[0], sv[2]]])
            .execute(&graph)
            .await?;
        let result = Operation::split("alice", vec![[sv[0], sv[2]]])
            .execute(&graph)
            .await?;

        assert_eq!(result.new_root_ids.len(), 1);
        assert_eq!(result.new_level2_ids.len(), 1);
        assert_eq!(
            graph.get_leaves(result.new_root_ids[0], None).await?,
            vec![sv[0], sv[1], sv[2]]
        );
        let agglomerations = graph.get_agglomerations(&result.new_level2_ids, None).await?;
        assert_eq!(agglomerations[&result.new_level2_ids[0]].in_chunk_edges.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_cross_chunk_merge_keeps_level2_nodes_apart() -> Result<()> {
        let (graph, _store) = create_test_graph()?;
        let left = graph.create_supervoxels([0, 0, 0], 1).await?[0];
        let right = graph.create_supervoxels([1, 0, 0], 1).await?[0];
        assert_eq!(graph.codec().cross_chunk_edge_layer(left, right)?, 2);

        let result = Operation::merge("alice", vec![[left, right]])
            .execute(&graph)
            .await?;
        assert_eq!(result.new_root_ids.len(), 1);
        assert_eq!(result.new_level2_ids.len(), 2);

        let left_l2 = graph.get_parent(left, None).await?.expect("left level-2");
        let right_l2 = graph.get_parent(right, None).await?.expect("right level-2");
        assert_ne!(left_l2, right_l2);

        let cells = graph
            .store()
            .read_node(left_l2, &[Column::CrossChunkEdges], None)
            .await?;
        let cross = cells.cross_chunk_edges().expect("cross-chunk edges stored");
        assert_eq!(cross.at(2), &[AtomicEdge::new(left, right, 1.0)]);

        // the two level-2 nodes share a parent at layer 3
        let left_l3 = graph.get_parent(left_l2, None).await?.expect("left layer 3");
        let right_l3 = graph.get_parent(right_l2, None).await?.expect("right layer 3");
        assert_eq!(left_l3, right_l3);
        assert_eq!(left_l3.layer(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_split_of_cross_chunk_edge() -> Result<()> {
        let (graph, _store) = create_test_graph()?;
        let left = graph.create_supervoxels([1, 1, 1], 1).await?[0];
        let right = graph.create_supervoxels([2, 1, 1], 1).await?[0];
        // chunks 1 and 2 first meet at layer 4
        assert_eq!(graph.codec().cross_chunk_edge_layer(left, right)?, 3);

        Operation::merge("alice", vec![[left, right]]).execute(&graph).await?;
        assert_eq!(
            graph.get_root(left, None, None).await?,
            graph.get_root(right, None, None).await?
        );
        let left_l3 = graph.get_root(left, None, Some(3)).await?;
        let right_l3 = graph.get_root(right, None, Some(3)).await?;
        assert_ne!(left_l3, right_l3);

        let result = Operation::split("alice", vec![[right, left]])
            .execute(&graph)
            .await?;
        assert_eq!(result.new_root_ids.len(), 2);
        assert_ne!(
            graph.get_root(left, None, None).await?,
            graph.get_root(right, None, None).await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_into_object_with_untouched_sibling() -> Result<()> {
        let (graph, _store) = create_test_graph()?;
        let a = graph.create_supervoxels([0, 0, 0], 1).await?[0];
        let cd = graph.create_supervoxels([1, 0, 0], 2).await?;

        Operation::merge("alice", vec![[a, cd[0]]]).execute(&graph).await?;
        let a_level2 = graph.get_parent(a, None).await?;

        // editing only the right chunk must keep the left level-2 node
        let result = Operation::merge("alice", vec![[cd[0], cd[1]]])
            .execute(&graph)
            .await?;
        assert_eq!(result.new_level2_ids.len(), 1);
        assert_eq!(graph.get_parent(a, None).await?, a_level2);
        assert_eq!(
            leaves_of_root(&graph, a).await?,
            BTreeSet::from([a, cd[0], cd[1]])
        );

        let a_l3 = graph.get_root(a, None, Some(3)).await?;
        let c_l3 = graph.get_root(cd[1], None, Some(3)).await?;
        assert_eq!(a_l3, c_l3);
        Ok(())
    }

    #[tokio::test]
    async fn test_split_requires_single_root() -> Result<()> {
        let (graph, store) = create_test_graph()?;
        let sv = graph.create_supervoxels([0, 0, 0], 2).await?;
        let rows = store.row_count().await;

        let err = Operation::split("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await
            .unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("Already split?"));
        assert_eq!(store.row_count().await, rows);
        assert_eq!(store.log_count().await, 0);
        Ok(())
    }
}

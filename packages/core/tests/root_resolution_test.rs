//! Root Resolution Tests
//!
//! Roots resolve through the versioned parent column, so every read can be
//! pinned to a timestamp and sees the hierarchy exactly as it was then.

#[cfg(test)]
mod root_resolution_tests {
    use anyhow::Result;
    use chrono::Duration;
    use chunkgraph_core::config::GraphConfig;
    use chunkgraph_core::db::{InMemoryStore, VersionedStore};
    use chunkgraph_core::operations::Operation;
    use chunkgraph_core::services::{ChunkedGraph, GraphError, PreconditionError};
    use std::sync::Arc;

    fn create_test_graph() -> Result<(ChunkedGraph, Arc<InMemoryStore>)> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let store = Arc::new(InMemoryStore::new());
        let graph = ChunkedGraph::new(GraphConfig::default(), store.clone())?;
        Ok((graph, store))
    }

    #[tokio::test]
    async fn test_roots_as_of_earlier_timestamp() -> Result<()> {
        let (graph, store) = create_test_graph()?;
        let sv = graph.create_supervoxels([0, 2, 0], 2).await?;
        let before = graph.get_roots(&sv, None, None, true).await?;
        assert_ne!(before[0], before[1]);

        let merge = Operation::merge("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await?;
        let committed_at = store
            .read_log(merge.operation_id)
            .await?
            .and_then(|log| log.timestamp)
            .expect("commit timestamp");
        let just_before = committed_at - Duration::microseconds(1);

        assert_eq!(graph.get_roots(&sv, Some(just_before), None, true).await?, before);
        assert_eq!(
            graph.get_roots(&sv, Some(committed_at), None, true).await?,
            vec![merge.new_root_ids[0]; 2]
        );

        // the new root did not exist yet
        assert!(graph.get_leaves(merge.new_root_ids[0], Some(just_before)).await?.is_empty());
        assert!(graph.is_latest_root(before[0], Some(just_before)).await?);
        assert!(!graph.is_latest_root(before[0], None).await?);
        assert!(!graph.is_latest_root(merge.new_root_ids[0], Some(just_before)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_layer_returns_ancestors() -> Result<()> {
        let (graph, _store) = create_test_graph()?;
        let sv = graph.create_supervoxels([1, 1, 1], 3).await?;
        let merge = Operation::merge("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await?;

        let level2 = graph.get_roots(&sv, None, Some(2), true).await?;
        assert_eq!(level2[0], merge.new_level2_ids[0]);
        assert_eq!(level2[1], merge.new_level2_ids[0]);
        assert_ne!(level2[2], level2[0]);
        assert!(level2.iter().all(|id| id.layer() == 2));

        // a stop layer above the root layer is clamped
        let roots = graph.get_roots(&sv, None, Some(200), true).await?;
        assert!(roots.iter().all(|id| id.layer() == graph.layer_count()));

        // nodes at or above the stop layer resolve to themselves
        assert_eq!(graph.get_root(level2[2], None, Some(2)).await?, level2[2]);
        Ok(())
    }

    #[tokio::test]
    async fn test_latest_roots_follow_lineage() -> Result<()> {
        let (graph, store) = create_test_graph()?;
        let sv = graph.create_supervoxels([0, 0, 3], 2).await?;
        let original = graph.get_root(sv[0], None, None).await?;

        let merge = Operation::merge("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await?;
        let split = Operation::split("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await?;

        let mut expected = split.new_root_ids.clone();
        expected.sort();
        assert_eq!(graph.get_latest_roots(original, None).await?, expected);

        let split_at = store
            .read_log(split.operation_id)
            .await?
            .and_then(|log| log.timestamp)
            .expect("commit timestamp");
        assert_eq!(
            graph
                .get_latest_roots(original, Some(split_at - Duration::microseconds(1)))
                .await?,
            merge.new_root_ids
        );
        assert_eq!(
            graph.get_former_roots(split.new_root_ids[0], None).await?,
            merge.new_root_ids
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_supervoxel() -> Result<()> {
        let (graph, _store) = create_test_graph()?;
        graph.create_supervoxels([0, 0, 0], 1).await?;
        let unknown = graph.codec().encode(1, [0, 0, 0], 999)?;

        let err = graph.get_root(unknown, None, None).await.unwrap_err();
        assert_eq!(
            err,
            GraphError::Precondition(PreconditionError::UnknownNode { node_id: unknown })
        );

        let err = Operation::merge("alice", vec![[unknown, unknown]])
            .execute(&graph)
            .await
            .unwrap_err();
        assert!(err.is_precondition());
        Ok(())
    }
}

//! Undo/Redo Tests
//!
//! Undo and redo replay logged edits through the regular execute path. The
//! rows they write record only which operation they supersede, so chains of
//! undos and redos resolve back to the original merge or split.

#[cfg(test)]
mod undo_redo_tests {
    use anyhow::Result;
    use chunkgraph_core::config::GraphConfig;
    use chunkgraph_core::db::{InMemoryStore, VersionedStore};
    use chunkgraph_core::models::{AtomicEdge, LogRecordKind, NodeId};
    use chunkgraph_core::operations::{MergeOperation, Operation, OperationLogError};
    use chunkgraph_core::services::{ChunkedGraph, GraphError, PreconditionError};
    use chunkgraph_core::OperationId;
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

    async fn same_root(graph: &ChunkedGraph, a: NodeId, b: NodeId) -> Result<bool> {
        Ok(graph.get_root(a, None, None).await? == graph.get_root(b, None, None).await?)
    }

    #[tokio::test]
    async fn test_undo_and_redo_of_a_merge() -> Result<()> {
        let (graph, store) = create_test_graph()?;
        let sv = graph.create_supervoxels([0, 1, 0], 2).await?;

        let merge = Operation::merge("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await?;
        assert!(same_root(&graph, sv[0], sv[1]).await?);

        let undo = Operation::undo("bob", merge.operation_id)
            .execute(&graph)
            .await?;
        assert!(!same_root(&graph, sv[0], sv[1]).await?);
        assert_eq!(undo.new_root_ids.len(), 2);
        // each supervoxel is alone under its own new root
        for supervoxel in &sv {
            let root = graph.get_root(*supervoxel, None, None).await?;
            assert!(undo.new_root_ids.contains(&root));
            assert_eq!(graph.get_leaves(root, None).await?, vec![*supervoxel]);
        }

        let log = store.read_log(undo.operation_id).await?.expect("undo logged");
        assert_eq!(log.kind(false), Some(LogRecordKind::Undo));
        assert_eq!(log.undo_operation_id, Some(merge.operation_id));
        assert_eq!(log.removed_edges, None);
        assert_eq!(log.user_id, "bob");
        assert_eq!(log.root_ids, undo.new_root_ids);

        let redo = Operation::redo("bob", merge.operation_id)
            .execute(&graph)
            .await?;
        assert!(same_root(&graph, sv[0], sv[1]).await?);
        let log = store.read_log(redo.operation_id).await?.expect("redo logged");
        assert_eq!(log.kind(false), Some(LogRecordKind::Redo));
        assert_eq!(log.redo_operation_id, Some(merge.operation_id));

        // undoing the redo reverts the merge once more
        Operation::undo("alice", redo.operation_id)
            .execute(&graph)
            .await?;
        assert!(!same_root(&graph, sv[0], sv[1]).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_redo_of_an_undo_reverts_again() -> Result<()> {
        let (graph, store) = create_test_graph()?;
        let sv = graph.create_supervoxels([1, 3, 0], 2).await?;

        let merge = Operation::merge("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await?;
        let undo = Operation::undo("alice", merge.operation_id)
            .execute(&graph)
            .await?;
        Operation::redo("alice", merge.operation_id)
            .execute(&graph)
            .await?;
        assert!(same_root(&graph, sv[0], sv[1]).await?);

        // redoing the undo separates the supervoxels once more
        let redo = Operation::redo("bob", undo.operation_id)
            .execute(&graph)
            .await?;
        assert!(!same_root(&graph, sv[0], sv[1]).await?);
        assert_eq!(redo.new_root_ids.len(), 2);
        for root in &redo.new_root_ids {
            assert_eq!(graph.get_leaves(*root, None).await?.len(), 1);
        }

        let log = store.read_log(redo.operation_id).await?.expect("redo logged");
        assert_eq!(log.kind(false), Some(LogRecordKind::Redo));
        assert_eq!(log.redo_operation_id, Some(undo.operation_id));
        assert_eq!(log.user_id, "bob");
        Ok(())
    }

    #[tokio::test]
    async fn test_undo_of_an_undo_reapplies_the_edit() -> Result<()> {
        let (graph, _store) = create_test_graph()?;
        let sv = graph.create_supervoxels([2, 2, 2], 2).await?;

        let merge = Operation::merge("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await?;
        let undo = Operation::undo("alice", merge.operation_id)
            .execute(&graph)
            .await?;
        assert!(!same_root(&graph, sv[0], sv[1]).await?);

        let reapplied = Operation::undo("alice", undo.operation_id)
            .execute(&graph)
            .await?;
        assert!(same_root(&graph, sv[0], sv[1]).await?);
        assert_eq!(reapplied.new_root_ids.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_undo_of_a_split_restores_affinities() -> Result<()> {
        let (graph, store) = create_test_graph()?;
        let sv = graph.create_supervoxels([0, 0, 1], 2).await?;

        Operation::Merge(MergeOperation {
            user_id: "alice".to_string(),
            added_edges: vec![[sv[0], sv[1]]],
            affinities: Some(vec![0.25]),
            source_coords: vec![[10, 10, 70]],
            sink_coords: vec![[20, 20, 70]],
        })
        .execute(&graph)
        .await?;

        let split = Operation::split("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await?;
        let log = store.read_log(split.operation_id).await?.expect("split logged");
        assert_eq!(log.affinities, Some(vec![0.25]));

        let undo = Operation::undo("alice", split.operation_id)
            .execute(&graph)
            .await?;
        assert_eq!(undo.new_level2_ids.len(), 1);
        let agglomerations = graph.get_agglomerations(&undo.new_level2_ids, None).await?;
        assert_eq!(
            agglomerations[&undo.new_level2_ids[0]].in_chunk_edges,
            vec![AtomicEdge::new(sv[0], sv[1], 0.25)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_undo_of_a_split_that_removed_nothing() -> Result<()> {
        let (graph, store) = create_test_graph()?;
        let sv = graph.create_supervoxels([1, 0, 0], 3).await?;

        // 0 and 1 only meet through 2, so the requested edge does not exist
        Operation::merge("alice", vec![[sv[0], sv[2]], [sv[2], sv[1]]])
            .execute(&graph)
            .await?;
        let split = Operation::split("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await?;
        let log = store.read_log(split.operation_id).await?.expect("split logged");
        assert_eq!(log.removed_edges, Some(Vec::new()));

        let logs = store.log_count().await;
        let err = Operation::undo("alice", split.operation_id)
            .execute(&graph)
            .await
            .unwrap_err();
        assert_eq!(err, GraphError::Precondition(PreconditionError::NoEdges));
        assert_eq!(store.log_count().await, logs);
        Ok(())
    }

    #[tokio::test]
    async fn test_undo_of_unknown_operation() -> Result<()> {
        let (graph, store) = create_test_graph()?;
        graph.create_supervoxels([0, 0, 0], 1).await?;

        let err = Operation::undo("alice", OperationId(4242))
            .execute(&graph)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::OperationLog(OperationLogError::MissingLogRecord { .. })
        ));
        assert!(!err.is_retryable());
        assert_eq!(store.log_count().await, 0);
        assert_eq!(store.lock_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_operation_from_id_rebuilds_logged_edit() -> Result<()> {
        let (graph, _store) = create_test_graph()?;
        let sv = graph.create_supervoxels([3, 0, 0], 2).await?;

        let merge = Operation::merge("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await?;
        let rebuilt = graph.operation_from_id(merge.operation_id, false).await?;
        match &rebuilt {
            Operation::Merge(op) => {
                assert_eq!(op.user_id, "alice");
                assert_eq!(op.added_edges, vec![[sv[0], sv[1]]]);
                assert_eq!(op.affinities, Some(vec![1.0]));
            }
            other => panic!("Expected merge, got {:?}", other),
        }
        assert_eq!(rebuilt.invert().kind(), LogRecordKind::Split);

        let undo = Operation::undo("bob", merge.operation_id)
            .execute(&graph)
            .await?;
        assert_eq!(
            graph.operation_from_id(undo.operation_id, false).await?,
            Operation::undo("bob", merge.operation_id)
        );
        Ok(())
    }
}

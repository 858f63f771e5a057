//! Event Emission Tests
//!
//! Every committed operation emits one `OperationCommitted` event, followed by
//! a `RemeshRequested` event when it produced level-2 nodes. Events are only
//! sent after the write succeeded; a failed operation emits nothing.

#[cfg(test)]
mod event_emission_tests {
    use anyhow::Result;
    use chunkgraph_core::config::GraphConfig;
    use chunkgraph_core::db::{GraphEvent, InMemoryStore};
    use chunkgraph_core::models::LogRecordKind;
    use chunkgraph_core::operations::Operation;
    use chunkgraph_core::services::ChunkedGraph;
    use std::sync::Arc;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::time::{timeout, Duration};

    /// Helper to create test graph
    fn create_test_graph() -> Result<ChunkedGraph> {
        let store = Arc::new(InMemoryStore::new());
        Ok(ChunkedGraph::new(GraphConfig::default(), store)?)
    }

    #[tokio::test]
    async fn test_merge_emits_commit_then_remesh() -> Result<()> {
        let graph = create_test_graph()?;
        let sv = graph.create_supervoxels([0, 0, 0], 2).await?;

        // Subscribe to events
        let mut rx = graph.subscribe();

        let result = Operation::merge("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await?;

        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("Event should be emitted within 1 second")
            .expect("Should receive event");
        match &event {
            GraphEvent::OperationCommitted {
                operation_id,
                kind,
                new_root_ids,
                new_level2_ids,
            } => {
                assert_eq!(*operation_id, result.operation_id);
                assert_eq!(*kind, LogRecordKind::Merge);
                assert_eq!(new_root_ids, &result.new_root_ids);
                assert_eq!(new_level2_ids, &result.new_level2_ids);
            }
            _ => panic!("Expected OperationCommitted event, got {:?}", event),
        }
        assert_eq!(event.event_type(), "operation:committed");

        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("Event should be emitted within 1 second")
            .expect("Should receive event");
        match event {
            GraphEvent::RemeshRequested {
                operation_id,
                level2_ids,
            } => {
                assert_eq!(operation_id, result.operation_id);
                assert_eq!(level2_ids, result.new_level2_ids);
            }
            _ => panic!("Expected RemeshRequested event, got {:?}", event),
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_undo_event_reports_undo_kind() -> Result<()> {
        let graph = create_test_graph()?;
        let sv = graph.create_supervoxels([1, 0, 0], 2).await?;
        let merge = Operation::merge("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await?;

        // Subscribe AFTER the merge to skip its events
        let mut rx = graph.subscribe();
        let undo = Operation::undo("alice", merge.operation_id)
            .execute(&graph)
            .await?;

        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("Event should be emitted within 1 second")
            .expect("Should receive event");
        match event {
            GraphEvent::OperationCommitted {
                operation_id, kind, ..
            } => {
                assert_eq!(operation_id, undo.operation_id);
                assert_eq!(kind, LogRecordKind::Undo);
            }
            _ => panic!("Expected OperationCommitted event, got {:?}", event),
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_operation_emits_nothing() -> Result<()> {
        let graph = create_test_graph()?;
        let sv = graph.create_supervoxels([0, 0, 0], 2).await?;
        let mut rx = graph.subscribe();

        // the supervoxels were never merged
        let err = Operation::split("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await;
        assert!(err.is_err());

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        Ok(())
    }

    #[tokio::test]
    async fn test_event_serialization() -> Result<()> {
        let graph = create_test_graph()?;
        let sv = graph.create_supervoxels([0, 1, 0], 2).await?;
        let mut rx = graph.subscribe();
        Operation::merge("alice", vec![[sv[0], sv[1]]])
            .execute(&graph)
            .await?;

        let event = rx.recv().await?;
        let json = serde_json::to_value(&event)?;
        assert_eq!(json["type"], "operationCommitted");
        assert_eq!(json["kind"], "merge");
        assert!(json["newRootIds"].is_array());

        let decoded: GraphEvent = serde_json::from_value(json)?;
        assert_eq!(decoded, event);
        Ok(())
    }
}

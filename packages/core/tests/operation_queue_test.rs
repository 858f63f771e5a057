//! Operation Queue Tests
//!
//! The queue re-submits an operation after a locking failure, re-resolving its
//! roots on every attempt. Any other failure is returned immediately.

#[cfg(test)]
mod operation_queue_tests {
    use anyhow::Result;
    use chunkgraph_core::config::{GraphConfig, LockConfig};
    use chunkgraph_core::db::InMemoryStore;
    use chunkgraph_core::operations::{Operation, OperationQueue};
    use chunkgraph_core::services::{ChunkedGraph, GraphError, PreconditionError};
    use std::sync::Arc;
    use tokio::time::{sleep, Duration, Instant};

    fn create_test_queue() -> Result<(OperationQueue, Arc<InMemoryStore>)> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let store = Arc::new(InMemoryStore::new());
        let config = GraphConfig {
            lock: LockConfig {
                ttl_ms: 60_000,
                max_acquire_attempts: 1,
                backoff_base_ms: 1,
            },
            ..GraphConfig::default()
        };
        let graph = ChunkedGraph::new(config, store.clone())?;
        Ok((OperationQueue::new(graph), store))
    }

    #[tokio::test]
    async fn test_retry_succeeds_once_lock_is_released() -> Result<()> {
        let (queue, store) = create_test_queue()?;
        let graph = queue.graph();
        let sv = graph.create_supervoxels([0, 0, 0], 2).await?;
        let root = graph.get_root(sv[0], None, None).await?;

        let held = graph.lock_manager().acquire(&[root]).await?;
        let releaser = tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            held.release().await
        });

        // 10 + 20 + 40 + 80 + 160ms of backoff outlasts the held lock
        let result = queue
            .execute_with_retry(&Operation::merge("alice", vec![[sv[0], sv[1]]]), 5)
            .await?;
        releaser.await??;

        assert_eq!(result.new_root_ids.len(), 1);
        assert_eq!(graph.get_root(sv[1], None, None).await?, result.new_root_ids[0]);
        assert_eq!(store.lock_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_locking_error() -> Result<()> {
        let (queue, store) = create_test_queue()?;
        let graph = queue.graph();
        let sv = graph.create_supervoxels([2, 0, 0], 2).await?;
        let root = graph.get_root(sv[0], None, None).await?;
        let held = graph.lock_manager().acquire(&[root]).await?;

        let err = queue
            .execute_with_retry(&Operation::merge("alice", vec![[sv[0], sv[1]]]), 2)
            .await
            .unwrap_err();
        assert!(err.is_locking());
        assert_eq!(store.log_count().await, 0);

        held.release().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_precondition_failure_is_not_retried() -> Result<()> {
        let (queue, _store) = create_test_queue()?;
        let sv = queue.graph().create_supervoxels([0, 3, 0], 2).await?;

        let started = Instant::now();
        let err = queue
            .execute_with_retry(&Operation::split("alice", vec![[sv[0], sv[1]]]), 8)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GraphError::Precondition(PreconditionError::MultipleRoots { .. })
        ));
        assert!(!err.is_retryable());
        // eight retries would sleep for more than two seconds
        assert!(started.elapsed() < Duration::from_secs(2));
        Ok(())
    }
}

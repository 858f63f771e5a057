//! Operation queue with retry on lock contention
//!
//! `execute` never retries: a root that is locked or superseded fails the
//! operation with a `LockingError`. Callers that can tolerate waiting submit
//! through this queue instead, which re-runs the operation with exponential
//! backoff. Every attempt resolves its roots afresh, so a root replaced by
//! the competing edit is picked up on the next try.
//!
//! # Example
//!
//! ```rust,no_run
//! use chunkgraph_core::operations::{Operation, OperationQueue};
//! # use chunkgraph_core::services::ChunkedGraph;
//! # use chunkgraph_core::models::NodeId;
//!
//! # async fn example(graph: ChunkedGraph, a: NodeId, b: NodeId) -> anyhow::Result<()> {
//! let queue = OperationQueue::new(graph);
//!
//! // Retry up to 3 times with exponential backoff (10ms, 20ms, 40ms)
//! let result = queue
//!     .execute_with_retry(&Operation::merge("alice", vec![[a, b]]), 3)
//!     .await?;
//! println!("new roots: {:?}", result.new_root_ids);
//! # Ok(())
//! # }
//! ```

use super::{Operation, OperationResult};
use crate::services::{ChunkedGraph, GraphResult};
use tokio::time::Duration;

/// Base delay before the first retry
const RETRY_BACKOFF_BASE_MS: u64 = 10;

/// Submits operations and retries them on locking errors
#[derive(Clone)]
pub struct OperationQueue {
    graph: ChunkedGraph,
}

impl OperationQueue {
    pub fn new(graph: ChunkedGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &ChunkedGraph {
        &self.graph
    }

    /// Execute `operation`, retrying up to `max_retries` times on lock contention
    ///
    /// # Retry Behavior
    ///
    /// - **Retry on**: `GraphError::Locking` only
    /// - **Backoff**: Exponential (10ms, 20ms, 40ms, 80ms, ...)
    /// - **Other errors**: Fail immediately without retry
    pub async fn execute_with_retry(
        &self,
        operation: &Operation,
        max_retries: usize,
    ) -> GraphResult<OperationResult> {
        let mut attempt = 0;

        loop {
            match operation.execute(&self.graph).await {
                Ok(result) => {
                    if attempt > 0 {
                        tracing::debug!(
                            "{} {} succeeded after {} retry(ies)",
                            operation.kind(),
                            result.operation_id,
                            attempt
                        );
                    }
                    return Ok(result);
                }

                Err(e) if e.is_retryable() && attempt < max_retries => {
                    tracing::debug!(
                        "Locking failure on attempt {}/{} for {}: {}. Retrying...",
                        attempt + 1,
                        max_retries + 1,
                        operation.kind(),
                        e
                    );

                    let backoff_ms = RETRY_BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(16));
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;

                    attempt += 1;
                }

                Err(e) => {
                    if e.is_locking() {
                        tracing::warn!(
                            "Max retries ({}) exceeded for {} operation",
                            max_retries,
                            operation.kind()
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}

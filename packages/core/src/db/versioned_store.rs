//! VersionedStore Trait - Storage Abstraction Layer
//!
//! This module defines the `VersionedStore` trait: the contract the edit
//! engine requires from a timestamped, column-family key-value store.
//!
//! # Architecture
//!
//! - **Multi-version rows**: every cell write is kept with its timestamp;
//!   reads return versions `<= end_time`, newest first
//! - **Conditional writes**: root lock claims, sequence counters and guarded
//!   commits are each a single check-and-set on the store
//! - **Append-only log**: one [`LogRecord`] per operation id
//!
//! # Design Decisions
//!
//! 1. **Async-First**: all methods are async so network-backed stores fit the
//!    same contract as the in-memory reference store
//! 2. **Typed errors**: methods return [`StoreError`] so a lost lock on commit
//!    is distinguishable from an I/O failure
//! 3. **Atomic commit set**: `write_atomic` writes the log row and every row
//!    mutation together, or nothing
//!
//! # Examples
//!
//! ```rust,no_run
//! use chunkgraph_core::db::{InMemoryStore, VersionedStore, WriteBatch};
//! use chunkgraph_core::models::{Cell, Column, NodeId, RowMutation};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store: Arc<dyn VersionedStore> = Arc::new(InMemoryStore::new());
//!
//!     let batch = WriteBatch::new()
//!         .with_row(RowMutation::new(NodeId(1)).with(Cell::Parent(NodeId(2))));
//!     store.write_unguarded(batch).await?;
//!
//!     let cells = store.read_node(NodeId(1), &[Column::Parent], None).await?;
//!     assert_eq!(cells.parent(), Some(NodeId(2)));
//!     Ok(())
//! }
//! ```

use super::error::StoreError;
use crate::models::{ChunkId, Column, LogRecord, NodeCells, NodeId, OperationId, RowMutation};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Rows (and optionally a log row) committed together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    /// Operation stamped on every cell
    pub operation_id: Option<OperationId>,
    /// Timestamp stamped on every cell; the store clock is used when absent
    pub timestamp: Option<DateTime<Utc>>,
    pub log: Option<LogRecord>,
    pub rows: Vec<RowMutation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row(mut self, row: RowMutation) -> Self {
        self.rows.push(row);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_none() && self.rows.is_empty()
    }
}

/// Proof of lock ownership checked by a guarded commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockClaim {
    pub root_ids: Vec<NodeId>,
    pub operation_id: OperationId,
}

/// Result of trying to claim the lock row of one root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Root was free; claim written at `timestamp`
    Claimed { timestamp: DateTime<Utc> },
    /// An expired claim by `previous` was overwritten
    Stolen {
        previous: OperationId,
        timestamp: DateTime<Utc>,
    },
    /// A live claim by another operation exists
    Held {
        holder: OperationId,
        expires_at: DateTime<Utc>,
    },
}

/// Abstraction over a timestamped column-family store
///
/// Implementations must be `Send + Sync`; every conditional primitive
/// (`try_claim_root`, `new_sequence*`, `new_operation_id`, `write_atomic`)
/// must be atomic with respect to concurrent callers.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    //
    // READS
    //

    /// Versions of `columns` of one row with timestamps `<= end_time`
    ///
    /// A missing row yields empty cells, not an error.
    async fn read_node(
        &self,
        id: NodeId,
        columns: &[Column],
        end_time: Option<DateTime<Utc>>,
    ) -> Result<NodeCells, StoreError>;

    /// Batch variant of [`VersionedStore::read_node`]; every requested id is present
    async fn read_nodes(
        &self,
        ids: &[NodeId],
        columns: &[Column],
        end_time: Option<DateTime<Utc>>,
    ) -> Result<BTreeMap<NodeId, NodeCells>, StoreError>;

    /// Every existing row in the inclusive interval `[start, end]`
    async fn read_range(
        &self,
        start: NodeId,
        end: NodeId,
        columns: &[Column],
        end_time: Option<DateTime<Utc>>,
    ) -> Result<BTreeMap<NodeId, NodeCells>, StoreError>;

    //
    // WRITES
    //

    /// Commit `batch` only if every root in `guard` is still claimed by
    /// `guard.operation_id`; renews those claims on success
    async fn write_atomic(&self, batch: WriteBatch, guard: &LockClaim) -> Result<(), StoreError>;

    /// Commit without a lock check (graph creation only)
    async fn write_unguarded(&self, batch: WriteBatch) -> Result<(), StoreError>;

    //
    // COUNTERS
    //

    /// Next sequence number of a chunk (starts at 1, never reused)
    async fn new_sequence(&self, chunk: ChunkId) -> Result<u64, StoreError>;

    /// `count` consecutive sequence numbers of a chunk
    async fn new_sequence_batch(&self, chunk: ChunkId, count: usize)
        -> Result<Vec<u64>, StoreError>;

    /// Highest sequence number issued for a chunk (0 if none)
    async fn max_sequence(&self, chunk: ChunkId) -> Result<u64, StoreError>;

    /// Next globally unique operation id
    async fn new_operation_id(&self) -> Result<OperationId, StoreError>;

    /// Highest operation id issued so far
    async fn max_operation_id(&self) -> Result<OperationId, StoreError>;

    //
    // ROOT LOCKS
    //

    /// Claim the lock row of `root` for `operation_id` for `ttl`
    async fn try_claim_root(
        &self,
        root: NodeId,
        operation_id: OperationId,
        ttl: Duration,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Clear the claim on `root` if it belongs to `operation_id`
    ///
    /// Returns false when the claim was already gone or stolen.
    async fn release_root(&self, root: NodeId, operation_id: OperationId)
        -> Result<bool, StoreError>;

    /// Timestamp at which `operation_id` claimed `root`, if it still holds it
    async fn lock_timestamp(
        &self,
        root: NodeId,
        operation_id: OperationId,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    //
    // OPERATION LOG
    //

    async fn read_log(&self, operation_id: OperationId) -> Result<Option<LogRecord>, StoreError>;

    /// Log rows with ids in the inclusive interval `[start, end]`, ascending
    async fn read_logs(
        &self,
        start: OperationId,
        end: OperationId,
    ) -> Result<Vec<LogRecord>, StoreError>;
}

//! In-memory reference implementation of [`VersionedStore`]
//!
//! All tables live behind one `tokio::sync::RwLock`; every conditional
//! primitive runs under the write guard, which makes it atomic. A separate
//! clock hands out strictly increasing timestamps so that versions written by
//! consecutive operations never tie.

use super::error::StoreError;
use super::versioned_store::{ClaimOutcome, LockClaim, VersionedStore, WriteBatch};
use crate::models::{
    Cell, ChunkId, Column, LogRecord, NodeCells, NodeId, OperationId, Versioned,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone)]
struct LockCell {
    operation_id: OperationId,
    claimed_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    ttl: Duration,
}

type Row = BTreeMap<Column, Vec<Versioned<Cell>>>;

#[derive(Debug, Default)]
struct StoreState {
    rows: HashMap<NodeId, Row>,
    logs: BTreeMap<OperationId, LogRecord>,
    sequences: HashMap<ChunkId, u64>,
    operation_counter: u64,
    locks: HashMap<NodeId, LockCell>,
}

impl StoreState {
    fn cells(&self, id: NodeId, columns: &[Column], end_time: Option<DateTime<Utc>>) -> NodeCells {
        let mut cells = NodeCells::new(id);
        if let Some(row) = self.rows.get(&id) {
            for column in columns {
                let versions: Vec<Versioned<Cell>> = row
                    .get(column)
                    .map(|versions| {
                        versions
                            .iter()
                            .filter(|v| end_time.map_or(true, |t| v.timestamp <= t))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                if !versions.is_empty() {
                    cells.columns.insert(*column, versions);
                }
            }
        }
        cells
    }

    fn apply(&mut self, batch: WriteBatch, timestamp: DateTime<Utc>) {
        for mutation in batch.rows {
            let row = self.rows.entry(mutation.node_id).or_default();
            for cell in mutation.cells {
                let versions = row.entry(cell.column()).or_default();
                // newest first; a later write at an equal timestamp wins
                let position = versions
                    .iter()
                    .position(|v| v.timestamp <= timestamp)
                    .unwrap_or(versions.len());
                versions.insert(
                    position,
                    Versioned {
                        value: cell,
                        timestamp,
                        operation_id: batch.operation_id,
                    },
                );
            }
        }

        if let Some(mut log) = batch.log {
            log.timestamp = Some(timestamp);
            self.logs.insert(log.operation_id, log);
        }
    }

    fn check_guard(&self, guard: &LockClaim, now: DateTime<Utc>) -> Result<(), StoreError> {
        for root in &guard.root_ids {
            match self.locks.get(root) {
                Some(cell) if cell.operation_id == guard.operation_id && cell.expires_at > now => {}
                Some(cell) if cell.operation_id == guard.operation_id => {
                    return Err(StoreError::lock_mismatch(*root, guard.operation_id, None));
                }
                other => {
                    return Err(StoreError::lock_mismatch(
                        *root,
                        guard.operation_id,
                        other.map(|cell| cell.operation_id),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Process-local versioned store
#[derive(Debug)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    clock: Mutex<DateTime<Utc>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            clock: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Strictly increasing wall-clock timestamp
    async fn tick(&self) -> DateTime<Utc> {
        let mut last = self.clock.lock().await;
        let now = Utc::now().max(*last + Duration::microseconds(1));
        *last = now;
        now
    }

    /// Operation currently holding the lock row of `root` (expired claims included)
    pub async fn lock_holder(&self, root: NodeId) -> Option<OperationId> {
        let state = self.state.read().await;
        state.locks.get(&root).map(|cell| cell.operation_id)
    }

    /// Number of lock rows present
    pub async fn lock_count(&self) -> usize {
        self.state.read().await.locks.len()
    }

    /// Number of node rows present
    pub async fn row_count(&self) -> usize {
        self.state.read().await.rows.len()
    }

    /// Number of log rows present
    pub async fn log_count(&self) -> usize {
        self.state.read().await.logs.len()
    }
}

#[async_trait]
impl VersionedStore for InMemoryStore {
    async fn read_node(
        &self,
        id: NodeId,
        columns: &[Column],
        end_time: Option<DateTime<Utc>>,
    ) -> Result<NodeCells, StoreError> {
        let state = self.state.read().await;
        Ok(state.cells(id, columns, end_time))
    }

    async fn read_nodes(
        &self,
        ids: &[NodeId],
        columns: &[Column],
        end_time: Option<DateTime<Utc>>,
    ) -> Result<BTreeMap<NodeId, NodeCells>, StoreError> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .map(|id| (*id, state.cells(*id, columns, end_time)))
            .collect())
    }

    async fn read_range(
        &self,
        start: NodeId,
        end: NodeId,
        columns: &[Column],
        end_time: Option<DateTime<Utc>>,
    ) -> Result<BTreeMap<NodeId, NodeCells>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .rows
            .keys()
            .filter(|id| **id >= start && **id <= end)
            .map(|id| (*id, state.cells(*id, columns, end_time)))
            .filter(|(_, cells)| !cells.is_empty())
            .collect())
    }

    async fn write_atomic(&self, batch: WriteBatch, guard: &LockClaim) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let now = self.tick().await;
        state.check_guard(guard, now)?;

        for root in &guard.root_ids {
            if let Some(cell) = state.locks.get_mut(root) {
                cell.expires_at = now + cell.ttl;
            }
        }

        let timestamp = batch.timestamp.unwrap_or(now);
        state.apply(batch, timestamp);
        Ok(())
    }

    async fn write_unguarded(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let now = self.tick().await;
        let timestamp = batch.timestamp.unwrap_or(now);
        state.apply(batch, timestamp);
        Ok(())
    }

    async fn new_sequence(&self, chunk: ChunkId) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let counter = state.sequences.entry(chunk).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn new_sequence_batch(
        &self,
        chunk: ChunkId,
        count: usize,
    ) -> Result<Vec<u64>, StoreError> {
        let mut state = self.state.write().await;
        let counter = state.sequences.entry(chunk).or_insert(0);
        let first = *counter + 1;
        *counter += count as u64;
        Ok((first..=*counter).collect())
    }

    async fn max_sequence(&self, chunk: ChunkId) -> Result<u64, StoreError> {
        let state = self.state.read().await;
        Ok(state.sequences.get(&chunk).copied().unwrap_or(0))
    }

    async fn new_operation_id(&self) -> Result<OperationId, StoreError> {
        let mut state = self.state.write().await;
        state.operation_counter += 1;
        Ok(OperationId(state.operation_counter))
    }

    async fn max_operation_id(&self) -> Result<OperationId, StoreError> {
        let state = self.state.read().await;
        Ok(OperationId(state.operation_counter))
    }

    async fn try_claim_root(
        &self,
        root: NodeId,
        operation_id: OperationId,
        ttl: Duration,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut state = self.state.write().await;
        let now = self.tick().await;

        let previous = match state.locks.get(&root) {
            Some(cell) if cell.operation_id != operation_id && cell.expires_at > now => {
                return Ok(ClaimOutcome::Held {
                    holder: cell.operation_id,
                    expires_at: cell.expires_at,
                });
            }
            Some(cell) if cell.operation_id != operation_id => Some(cell.operation_id),
            _ => None,
        };

        state.locks.insert(
            root,
            LockCell {
                operation_id,
                claimed_at: now,
                expires_at: now + ttl,
                ttl,
            },
        );

        Ok(match previous {
            Some(previous) => ClaimOutcome::Stolen {
                previous,
                timestamp: now,
            },
            None => ClaimOutcome::Claimed { timestamp: now },
        })
    }

    async fn release_root(
        &self,
        root: NodeId,
        operation_id: OperationId,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.locks.get(&root) {
            Some(cell) if cell.operation_id == operation_id => {
                state.locks.remove(&root);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lock_timestamp(
        &self,
        root: NodeId,
        operation_id: OperationId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .locks
            .get(&root)
            .filter(|cell| cell.operation_id == operation_id)
            .map(|cell| cell.claimed_at))
    }

    async fn read_log(&self, operation_id: OperationId) -> Result<Option<LogRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.logs.get(&operation_id).cloned())
    }

    async fn read_logs(
        &self,
        start: OperationId,
        end: OperationId,
    ) -> Result<Vec<LogRecord>, StoreError> {
        let state = self.state.read().await;
        if start > end {
            return Ok(Vec::new());
        }
        Ok(state.logs.range(start..=end).map(|(_, log)| log.clone()).collect())
    }
}

//! Root Lock Manager
//!
//! Serializes edits per root object without a global lock. Before an edit
//! reads anything it claims the lock row of every root it will replace. The
//! claims carry a freshly issued operation id and a TTL; an expired claim can
//! be stolen by anyone, which keeps the protocol live when a worker dies
//! mid-edit. Because of stealing, ownership is checked again at commit time by
//! the store's guarded write.
//!
//! # Lifecycle
//!
//! 1. `acquire` issues an operation id and claims every root (sorted order)
//! 2. Claimed roots that already carry a `NewParent` are rejected as superseded
//! 3. The earliest claim timestamp becomes the single read timestamp of the edit
//! 4. `release` clears the claims; dropping an unreleased lock schedules the
//!    release on the current tokio runtime

use crate::config::LockConfig;
use crate::db::{ClaimOutcome, LockClaim, VersionedStore};
use crate::models::{Column, NodeId, OperationId};
use crate::services::error::{GraphError, GraphResult, LockingError, PreconditionError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::Duration;

/// Issues and releases root locks
#[derive(Clone)]
pub struct RootLockManager {
    store: Arc<dyn VersionedStore>,
    config: LockConfig,
}

impl RootLockManager {
    pub fn new(store: Arc<dyn VersionedStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    fn ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.config.ttl_ms.min(i64::MAX as u64) as i64)
    }

    /// Claim every root in `root_ids` under one new operation id
    ///
    /// Retries with exponential backoff while a root is held by a live lock,
    /// up to `max_acquire_attempts`. A superseded root fails immediately since
    /// waiting cannot help; the caller must re-resolve its roots.
    pub async fn acquire(&self, root_ids: &[NodeId]) -> GraphResult<RootLock> {
        let mut roots = root_ids.to_vec();
        roots.sort();
        roots.dedup();
        if roots.is_empty() {
            return Err(PreconditionError::NoRoots.into());
        }

        let operation_id = self.store.new_operation_id().await?;
        let ttl = self.ttl();
        let mut attempt: u32 = 0;

        loop {
            match self.try_acquire(&roots, operation_id, ttl).await {
                Ok(timestamp) => {
                    tracing::debug!(
                        "Acquired lock {} on {} root(s) at {}",
                        operation_id,
                        roots.len(),
                        timestamp
                    );
                    return Ok(RootLock {
                        store: self.store.clone(),
                        root_ids: roots,
                        operation_id,
                        timestamp,
                        ttl,
                        released: false,
                    });
                }

                Err(GraphError::Locking(LockingError::RootLocked { root_id, holder }))
                    if attempt + 1 < self.config.max_acquire_attempts =>
                {
                    tracing::debug!(
                        "Root {} held by {} on attempt {}/{} for {}. Retrying...",
                        root_id,
                        holder,
                        attempt + 1,
                        self.config.max_acquire_attempts,
                        operation_id
                    );

                    // Exponential backoff: base, 2x base, 4x base, ...
                    let backoff_ms = self
                        .config
                        .backoff_base_ms
                        .saturating_mul(1u64 << attempt.min(16));
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;

                    attempt += 1;
                }

                Err(e) => {
                    if e.is_locking() {
                        tracing::warn!("Failed to lock roots {:?} for {}: {}", roots, operation_id, e);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// One acquisition attempt; on failure no claim of this attempt survives
    async fn try_acquire(
        &self,
        roots: &[NodeId],
        operation_id: OperationId,
        ttl: chrono::Duration,
    ) -> GraphResult<DateTime<Utc>> {
        let mut claimed = Vec::with_capacity(roots.len());

        for root in roots {
            let outcome = match self.store.try_claim_root(*root, operation_id, ttl).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    release_all(self.store.as_ref(), &claimed, operation_id).await;
                    return Err(e.into());
                }
            };

            match outcome {
                ClaimOutcome::Claimed { .. } => claimed.push(*root),
                ClaimOutcome::Stolen { previous, .. } => {
                    tracing::warn!(
                        "Stole expired lock on root {} from {} for {}",
                        root,
                        previous,
                        operation_id
                    );
                    claimed.push(*root);
                }
                ClaimOutcome::Held { holder, .. } => {
                    release_all(self.store.as_ref(), &claimed, operation_id).await;
                    return Err(LockingError::RootLocked {
                        root_id: *root,
                        holder,
                    }
                    .into());
                }
            }
        }

        if let Err(e) = self.check_latest(roots).await {
            release_all(self.store.as_ref(), &claimed, operation_id).await;
            return Err(e);
        }

        let mut timestamp: Option<DateTime<Utc>> = None;
        for root in roots {
            match self.store.lock_timestamp(*root, operation_id).await? {
                Some(claimed_at) => {
                    timestamp = Some(timestamp.map_or(claimed_at, |t| t.min(claimed_at)));
                }
                None => {
                    release_all(self.store.as_ref(), &claimed, operation_id).await;
                    return Err(LockingError::LockLost {
                        root_id: *root,
                        operation_id,
                    }
                    .into());
                }
            }
        }

        timestamp.ok_or_else(|| PreconditionError::NoRoots.into())
    }

    /// Reject roots already replaced by a committed edit
    async fn check_latest(&self, roots: &[NodeId]) -> GraphResult<()> {
        let cells = self
            .store
            .read_nodes(roots, &[Column::NewParent], None)
            .await?;
        for (root, cells) in cells {
            if let Some(new_roots) = cells.new_parents() {
                return Err(LockingError::RootSuperseded {
                    root_id: root,
                    new_root_ids: new_roots.to_vec(),
                }
                .into());
            }
        }
        Ok(())
    }
}

async fn release_all(store: &dyn VersionedStore, roots: &[NodeId], operation_id: OperationId) {
    for root in roots {
        if let Err(e) = store.release_root(*root, operation_id).await {
            tracing::warn!("Failed to release root {} for {}: {}", root, operation_id, e);
        }
    }
}

/// Exclusive claim on a set of roots for one operation
pub struct RootLock {
    store: Arc<dyn VersionedStore>,
    root_ids: Vec<NodeId>,
    operation_id: OperationId,
    timestamp: DateTime<Utc>,
    ttl: chrono::Duration,
    released: bool,
}

impl std::fmt::Debug for RootLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootLock")
            .field("root_ids", &self.root_ids)
            .field("operation_id", &self.operation_id)
            .field("timestamp", &self.timestamp)
            .field("released", &self.released)
            .finish()
    }
}

impl RootLock {
    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    pub fn root_ids(&self) -> &[NodeId] {
        &self.root_ids
    }

    /// Consolidated lock timestamp: every read of the edit happens as of this time
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.timestamp + self.ttl
    }

    /// Guard presented to `VersionedStore::write_atomic`
    pub fn claim(&self) -> LockClaim {
        LockClaim {
            root_ids: self.root_ids.clone(),
            operation_id: self.operation_id,
        }
    }

    /// Clear every claim held by this lock
    pub async fn release(mut self) -> GraphResult<()> {
        self.released = true;
        let mut first_error = None;
        for root in &self.root_ids {
            match self.store.release_root(*root, self.operation_id).await {
                Ok(true) => {}
                Ok(false) => tracing::debug!(
                    "Lock on root {} no longer held by {} at release",
                    root,
                    self.operation_id
                ),
                Err(e) => {
                    tracing::warn!("Failed to release root {}: {}", root, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        tracing::debug!("Released lock {}", self.operation_id);
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let roots = std::mem::take(&mut self.root_ids);
        let store = self.store.clone();
        let operation_id = self.operation_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(
                    "Lock {} dropped without release; releasing {} root(s) in background",
                    operation_id,
                    roots.len()
                );
                handle.spawn(async move {
                    release_all(store.as_ref(), &roots, operation_id).await;
                });
            }
            Err(_) => tracing::warn!(
                "Lock {} dropped outside a runtime; claims expire with their TTL",
                operation_id
            ),
        }
    }
}

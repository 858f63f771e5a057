//! Store Error Types
//!
//! Errors surfaced by [`crate::db::VersionedStore`] implementations. A failed
//! guarded commit (`LockMismatch`) is kept distinct from generic I/O failures
//! so callers can tell "lost the lock" apart from "store is unhealthy".

use crate::models::{NodeId, OperationId};
use thiserror::Error;

/// Versioned store operation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Guarded write rejected because a root lock is no longer held
    #[error("Lock on root {root_id} is not held by {expected} (holder: {actual:?})")]
    LockMismatch {
        root_id: NodeId,
        expected: OperationId,
        actual: Option<OperationId>,
    },

    /// Store temporarily unreachable; safe to retry with backoff
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be interpreted
    #[error("Corrupt row {node_id}: {context}")]
    Corrupt { node_id: NodeId, context: String },
}

impl StoreError {
    /// Create a lock mismatch error
    pub fn lock_mismatch(
        root_id: NodeId,
        expected: OperationId,
        actual: Option<OperationId>,
    ) -> Self {
        Self::LockMismatch {
            root_id,
            expected,
            actual,
        }
    }

    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a corrupt row error
    pub fn corrupt(node_id: NodeId, context: impl Into<String>) -> Self {
        Self::Corrupt {
            node_id,
            context: context.into(),
        }
    }

    pub fn is_lock_mismatch(&self) -> bool {
        matches!(self, StoreError::LockMismatch { .. })
    }
}

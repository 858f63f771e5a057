//! Error types for the operation log and undo/redo resolution
//!
//! These errors describe log rows that cannot be turned back into an
//! operation: missing rows, rows of no recognisable kind, and undo/redo chains
//! that would not terminate.

use crate::models::OperationId;
use thiserror::Error;

/// Errors raised while reading or replaying the operation log
///
/// # Examples
///
/// ```rust
/// use chunkgraph_core::models::OperationId;
/// use chunkgraph_core::operations::OperationLogError;
///
/// let err = OperationLogError::NonMonotonicChain {
///     operation_id: OperationId(4),
///     target_id: OperationId(4),
/// };
/// assert!(err.to_string().contains("op:4"));
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationLogError {
    /// No log row exists for the operation id
    #[error("No log record for {operation_id}")]
    MissingLogRecord { operation_id: OperationId },

    /// The row carries none of the columns that identify an edit kind
    #[error("Log record {operation_id} has no recognisable operation kind")]
    UnknownRecordKind { operation_id: OperationId },

    /// A column required by the row's kind is absent
    #[error("Log record {operation_id} is missing column '{column}'")]
    MissingColumn {
        operation_id: OperationId,
        column: &'static str,
    },

    /// An undo/redo row points at itself or at a newer operation
    ///
    /// Chains are only guaranteed to terminate when every link points to a
    /// strictly older operation id.
    #[error("Undo/redo chain link {operation_id} -> {target_id} does not point to an older operation")]
    NonMonotonicChain {
        operation_id: OperationId,
        target_id: OperationId,
    },
}

impl OperationLogError {
    /// Create a missing log record error
    pub fn missing_log_record(operation_id: OperationId) -> Self {
        Self::MissingLogRecord { operation_id }
    }

    /// Create a missing column error
    pub fn missing_column(operation_id: OperationId, column: &'static str) -> Self {
        Self::MissingColumn {
            operation_id,
            column,
        }
    }
}

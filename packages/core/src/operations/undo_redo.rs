//! Undo/redo chain resolution
//!
//! An undo or redo names an earlier operation, which may itself be an undo or
//! redo. Walking the chain ends at a plain edit (merge, split or multicut):
//! passing through an `Undo` row flips whether that edit must be reverted,
//! passing through a `Redo` row does not. Every link must point to a strictly
//! older operation id, so the walk is bounded by the number of earlier
//! operations.

use super::error::OperationLogError;
use crate::db::VersionedStore;
use crate::models::{LogRecord, LogRecordKind, OperationId};
use crate::services::GraphResult;

/// Plain edit at the end of an undo/redo chain
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOperation {
    /// Log row of the merge, split or multicut the chain ends at
    pub record: LogRecord,
    /// Whether that edit must be reverted rather than re-applied
    pub is_undo: bool,
}

/// Follow the chain starting at `operation_id`
///
/// `want_undo` is true for an undo request and false for a redo request.
pub async fn resolve_undo_chain(
    store: &dyn VersionedStore,
    operation_id: OperationId,
    want_undo: bool,
) -> GraphResult<ResolvedOperation> {
    let mut current = operation_id;
    let mut is_undo = want_undo;

    loop {
        let record = store
            .read_log(current)
            .await?
            .ok_or_else(|| OperationLogError::missing_log_record(current))?;

        let next = match record.kind(false) {
            Some(LogRecordKind::Undo) => {
                is_undo = !is_undo;
                record.undo_operation_id
            }
            Some(LogRecordKind::Redo) => record.redo_operation_id,
            Some(_) => {
                tracing::debug!(
                    "Resolved {} to {} of {}",
                    operation_id,
                    if is_undo { "undo" } else { "redo" },
                    current
                );
                return Ok(ResolvedOperation { record, is_undo });
            }
            None => {
                return Err(OperationLogError::UnknownRecordKind {
                    operation_id: current,
                }
                .into())
            }
        };

        let target = next.ok_or(OperationLogError::UnknownRecordKind {
            operation_id: current,
        })?;
        if target >= current {
            return Err(OperationLogError::NonMonotonicChain {
                operation_id: current,
                target_id: target,
            }
            .into());
        }
        current = target;
    }
}

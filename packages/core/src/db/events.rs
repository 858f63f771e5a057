//! Domain Events for graph edits
//!
//! This module defines the events emitted by the graph service after an edit
//! commits. Other parts of the system (the remeshing worker, caches in the
//! API layer) subscribe to them instead of being called by the engine.
//!
//! # Architecture
//!
//! Events are emitted using tokio's broadcast channel, allowing multiple subscribers
//! to receive notifications asynchronously. Sending with no subscribers is not
//! an error.
//!
//! # Event Flow
//!
//! 1. An operation commits its rows through a guarded write
//! 2. `OperationCommitted` is emitted with the new root and level-2 ids
//! 3. `RemeshRequested` follows whenever level-2 ids were created
//! 4. The meshing collaborator regenerates meshes for those ids

use crate::models::{LogRecordKind, NodeId, OperationId};
use serde::{Deserialize, Serialize};

/// Domain events emitted by the graph service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GraphEvent {
    /// An edit committed atomically
    #[serde(rename_all = "camelCase")]
    OperationCommitted {
        operation_id: OperationId,
        kind: LogRecordKind,
        new_root_ids: Vec<NodeId>,
        new_level2_ids: Vec<NodeId>,
    },

    /// Meshes of these level-2 nodes must be regenerated
    #[serde(rename_all = "camelCase")]
    RemeshRequested {
        operation_id: OperationId,
        level2_ids: Vec<NodeId>,
    },
}

impl GraphEvent {
    /// Get a string representation of the event type
    pub fn event_type(&self) -> &str {
        match self {
            GraphEvent::OperationCommitted { .. } => "operation:committed",
            GraphEvent::RemeshRequested { .. } => "remesh:requested",
        }
    }

    pub fn operation_id(&self) -> OperationId {
        match self {
            GraphEvent::OperationCommitted { operation_id, .. }
            | GraphEvent::RemeshRequested { operation_id, .. } => *operation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Contract test: documents the JSON shape seen by event consumers
    #[test]
    fn test_event_serialization_contract() {
        let event = GraphEvent::RemeshRequested {
            operation_id: OperationId(12),
            level2_ids: vec![NodeId(5), NodeId(6)],
        };
        let parsed = serde_json::to_value(&event).unwrap();

        assert_eq!(parsed.get("type").unwrap(), "remeshRequested");
        assert_eq!(parsed.get("operationId").unwrap(), 12);
        assert_eq!(parsed.get("level2Ids").unwrap().as_array().unwrap().len(), 2);
        assert_eq!(event.event_type(), "remesh:requested");
    }
}

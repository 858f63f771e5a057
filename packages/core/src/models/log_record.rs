//! Operation log rows
//!
//! Every committed edit appends one [`LogRecord`] keyed by its operation id.
//! The kind of edit is not stored explicitly; it is recovered from which
//! columns are present (see [`LogRecord::kind`]).

use super::node_id::{NodeId, OperationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Voxel coordinate attached to a source or sink supervoxel
pub type VoxelCoord = [u64; 3];

/// Edit kind recovered from a log row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRecordKind {
    Merge,
    Split,
    Multicut,
    Undo,
    Redo,
}

impl LogRecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogRecordKind::Merge => "merge",
            LogRecordKind::Split => "split",
            LogRecordKind::Multicut => "multicut",
            LogRecordKind::Undo => "undo",
            LogRecordKind::Redo => "redo",
        }
    }
}

impl std::fmt::Display for LogRecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the operation log
///
/// Columns that do not apply to an edit kind are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub operation_id: OperationId,
    pub user_id: String,
    /// Roots produced by the edit
    #[serde(default)]
    pub root_ids: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_edges: Option<Vec<[NodeId; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_edges: Option<Vec<[NodeId; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinities: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ids: Option<Vec<NodeId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink_ids: Option<Vec<NodeId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_coords: Option<Vec<VoxelCoord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink_coords: Option<Vec<VoxelCoord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox_offset: Option<VoxelCoord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undo_operation_id: Option<OperationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redo_operation_id: Option<OperationId>,
    /// Commit timestamp, filled in by the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl LogRecord {
    pub fn new(operation_id: OperationId, user_id: impl Into<String>) -> Self {
        Self {
            operation_id,
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    /// Classify the row by the columns it carries
    ///
    /// Undo and redo markers take precedence over edge columns. A row with
    /// removed edges is a multicut only if it also carries a bounding-box
    /// offset and `multicut_as_split` is off.
    pub fn kind(&self, multicut_as_split: bool) -> Option<LogRecordKind> {
        if self.undo_operation_id.is_some() {
            Some(LogRecordKind::Undo)
        } else if self.redo_operation_id.is_some() {
            Some(LogRecordKind::Redo)
        } else if self.added_edges.is_some() {
            Some(LogRecordKind::Merge)
        } else if self.removed_edges.is_some() {
            if self.bbox_offset.is_some() && !multicut_as_split {
                Some(LogRecordKind::Multicut)
            } else {
                Some(LogRecordKind::Split)
            }
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification_order() {
        let mut record = LogRecord::new(OperationId(5), "alice");
        assert_eq!(record.kind(false), None);

        record.removed_edges = Some(vec![[NodeId(1), NodeId(2)]]);
        assert_eq!(record.kind(false), Some(LogRecordKind::Split));

        record.bbox_offset = Some([10, 10, 2]);
        assert_eq!(record.kind(false), Some(LogRecordKind::Multicut));
        assert_eq!(record.kind(true), Some(LogRecordKind::Split));

        record.added_edges = Some(vec![[NodeId(1), NodeId(2)]]);
        assert_eq!(record.kind(false), Some(LogRecordKind::Merge));

        record.redo_operation_id = Some(OperationId(3));
        assert_eq!(record.kind(false), Some(LogRecordKind::Redo));

        record.undo_operation_id = Some(OperationId(4));
        assert_eq!(record.kind(false), Some(LogRecordKind::Undo));
    }

    #[test]
    fn test_serialization_skips_absent_columns() {
        let mut record = LogRecord::new(OperationId(9), "bob");
        record.undo_operation_id = Some(OperationId(2));
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("added_edges").is_none());
        assert_eq!(json["undo_operation_id"], 2);

        let parsed: LogRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.kind(true), Some(LogRecordKind::Undo));
    }
}

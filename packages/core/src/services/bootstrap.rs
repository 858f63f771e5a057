//! Graph bootstrap
//!
//! Minimal graph creation: allocate supervoxels in a layer-1 chunk and give
//! each one its own single-child chain of ancestors up to a root. Bulk
//! ingestion of real agglomerations is handled outside this crate; edits
//! (merges) grow objects from these singletons.

use crate::db::WriteBatch;
use crate::models::{Cell, ChunkCoord, CrossChunkEdges, NodeId, RowMutation};
use crate::services::error::GraphResult;
use crate::services::graph::ChunkedGraph;

impl ChunkedGraph {
    /// Create `count` singleton supervoxels in the layer-1 chunk at `chunk_coord`
    ///
    /// Returns the new supervoxel ids in allocation order. Rows are written
    /// without a lock since no root can reference them yet.
    pub async fn create_supervoxels(
        &self,
        chunk_coord: ChunkCoord,
        count: usize,
    ) -> GraphResult<Vec<NodeId>> {
        let chunk = self.codec().chunk_id_at(1, chunk_coord)?;
        let supervoxels = self.allocate_node_ids(chunk, count).await?;
        let mut batch = WriteBatch::new();

        for supervoxel in &supervoxels {
            let mut child = *supervoxel;
            for layer in 2..=self.layer_count() {
                let parent_chunk = self.codec().parent_chunk_id(child, layer)?;
                let parent = self.allocate_node_id(parent_chunk).await?;

                batch.rows.push(RowMutation::new(child).with(Cell::Parent(parent)));

                let mut row = RowMutation::new(parent)
                    .with(Cell::Children(vec![child]))
                    .with(Cell::CrossChunkEdges(CrossChunkEdges::new()));
                if layer == 2 {
                    row = row.with(Cell::InChunkEdges(Vec::new()));
                }
                batch.rows.push(row);
                child = parent;
            }
        }

        self.store().write_unguarded(batch).await?;
        tracing::debug!(
            "Created {} supervoxel(s) in chunk {:?}",
            supervoxels.len(),
            chunk_coord
        );
        Ok(supervoxels)
    }
}

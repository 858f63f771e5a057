//! Voxel-space bounding boxes used to bound local subgraph extraction

use super::log_record::VoxelCoord;
use super::node_id::ChunkCoord;
use serde::{Deserialize, Serialize};

/// Inclusive axis-aligned box in voxel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: VoxelCoord,
    pub max: VoxelCoord,
}

impl BoundingBox {
    /// Smallest box containing `points`, grown by `offset` on every side
    pub fn around(points: &[VoxelCoord], offset: VoxelCoord) -> Option<Self> {
        let first = points.first()?;
        let mut min = *first;
        let mut max = *first;
        for point in &points[1..] {
            for axis in 0..3 {
                min[axis] = min[axis].min(point[axis]);
                max[axis] = max[axis].max(point[axis]);
            }
        }
        for axis in 0..3 {
            min[axis] = min[axis].saturating_sub(offset[axis]);
            max[axis] = max[axis].saturating_add(offset[axis]);
        }
        Some(Self { min, max })
    }

    /// Supervoxel-grid chunk coordinates touched by the box (inclusive)
    pub fn chunk_range(&self, chunk_size: [u64; 3]) -> (ChunkCoord, ChunkCoord) {
        let mut start = [0; 3];
        let mut end = [0; 3];
        for axis in 0..3 {
            let size = chunk_size[axis].max(1);
            start[axis] = self.min[axis] / size;
            end[axis] = self.max[axis] / size;
        }
        (start, end)
    }
}

/// Whether two inclusive chunk ranges intersect
pub fn ranges_overlap(a: (ChunkCoord, ChunkCoord), b: (ChunkCoord, ChunkCoord)) -> bool {
    (0..3).all(|axis| a.0[axis] <= b.1[axis] && b.0[axis] <= a.1[axis])
}

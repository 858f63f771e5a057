//! Node Identifier Addressing
//!
//! Every node in the graph is addressed by a single 64-bit value that packs
//! `(layer, chunk x, chunk y, chunk z, sequence)`:
//!
//! ```text
//! | layer (8) | x (b_L) | y (b_L) | z (b_L) | sequence (56 - 3 * b_L) |
//! ```
//!
//! `b_L` is the number of bits needed for the largest chunk coordinate at
//! layer `L`. Layers 1 and 2 share the supervoxel chunk grid; from layer 3 up
//! the grid shrinks by `fan_out` per layer, so higher layers get fewer
//! coordinate bits and more sequence bits.
//!
//! The codec is pure: it holds only the bit layout derived from a
//! [`GraphConfig`] and never touches the store.

use crate::config::{GraphConfig, LAYER_BITS};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 64-bit identifier of a graph node at any layer
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

/// Identifier of a chunk: a node id whose sequence field is zero
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChunkId(pub u64);

/// Globally unique, monotonically issued identifier of one edit
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OperationId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk:{}", self.0)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op:{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

impl NodeId {
    /// Layer stored in the top byte (no validation against a codec)
    pub fn layer(self) -> u8 {
        (self.0 >> (64 - LAYER_BITS as u32)) as u8
    }
}

impl ChunkId {
    pub fn layer(self) -> u8 {
        (self.0 >> (64 - LAYER_BITS as u32)) as u8
    }
}

/// Chunk coordinate on the grid of a given layer
pub type ChunkCoord = [u64; 3];

/// Fully unpacked node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedId {
    pub layer: u8,
    pub coord: ChunkCoord,
    pub sequence: u64,
}

/// Errors raised when a value does not fit the configured bit layout
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Layer {layer} is outside [1, {layer_count}]")]
    LayerOutOfRange { layer: u8, layer_count: u8 },

    #[error("Chunk coordinate {coord:?} is outside the layer {layer} grid {bounds:?}")]
    CoordinateOutOfRange {
        layer: u8,
        coord: ChunkCoord,
        bounds: ChunkCoord,
    },

    #[error("Sequence {sequence} overflows the {bits}-bit sequence field of layer {layer}")]
    SequenceOverflow { layer: u8, sequence: u64, bits: u8 },

    #[error("Layer {layer} leaves only {bits} sequence bits (minimum {min_bits})")]
    SegmentTooNarrow { layer: u8, bits: u8, min_bits: u8 },
}

/// Per-layer bit layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LayerLayout {
    dim_bits: u8,
    segment_bits: u8,
    bounds: ChunkCoord,
}

/// Bit-packing codec for node identifiers
#[derive(Debug, Clone)]
pub struct IdCodec {
    layer_count: u8,
    fan_out: u64,
    /// Indexed by layer; index 0 unused
    layouts: Vec<LayerLayout>,
}

impl IdCodec {
    /// Derive the bit layout for a graph
    ///
    /// Fails if any layer's sequence field would be narrower than
    /// `config.min_segment_bits`; this is a configuration error, never a
    /// runtime one.
    pub fn new(config: &GraphConfig) -> Result<Self, IdError> {
        let mut layouts = Vec::with_capacity(config.layer_count as usize + 1);
        layouts.push(LayerLayout {
            dim_bits: 0,
            segment_bits: 0,
            bounds: [0; 3],
        });

        for layer in 1..=config.layer_count {
            let divisor = pow_saturating(config.fan_out, grid_level(layer));
            let bounds = config.chunk_counts.map(|count| count.div_ceil(divisor).max(1));
            let max_coord = bounds.iter().copied().max().unwrap_or(1) - 1;
            let dim_bits = (u64::BITS - max_coord.leading_zeros()).max(1) as u8;
            let used = LAYER_BITS as u32 + 3 * dim_bits as u32;
            let segment_bits = 64u32.saturating_sub(used) as u8;
            if segment_bits < config.min_segment_bits.max(1) {
                return Err(IdError::SegmentTooNarrow {
                    layer,
                    bits: segment_bits,
                    min_bits: config.min_segment_bits,
                });
            }
            layouts.push(LayerLayout {
                dim_bits,
                segment_bits,
                bounds,
            });
        }

        Ok(Self {
            layer_count: config.layer_count,
            fan_out: config.fan_out,
            layouts,
        })
    }

    pub fn layer_count(&self) -> u8 {
        self.layer_count
    }

    pub fn fan_out(&self) -> u64 {
        self.fan_out
    }

    fn layout(&self, layer: u8) -> Result<&LayerLayout, IdError> {
        if layer == 0 || layer > self.layer_count {
            return Err(IdError::LayerOutOfRange {
                layer,
                layer_count: self.layer_count,
            });
        }
        Ok(&self.layouts[layer as usize])
    }

    /// Number of chunks per axis at `layer`
    pub fn grid_bounds(&self, layer: u8) -> Result<ChunkCoord, IdError> {
        Ok(self.layout(layer)?.bounds)
    }

    /// Largest sequence number representable at `layer`
    pub fn max_sequence(&self, layer: u8) -> Result<u64, IdError> {
        let bits = self.layout(layer)?.segment_bits;
        Ok(low_mask(bits))
    }

    /// Pack `(layer, x, y, z, sequence)` into a node id
    pub fn encode(&self, layer: u8, coord: ChunkCoord, sequence: u64) -> Result<NodeId, IdError> {
        let layout = self.layout(layer)?;
        if coord.iter().zip(layout.bounds.iter()).any(|(c, b)| c >= b) {
            return Err(IdError::CoordinateOutOfRange {
                layer,
                coord,
                bounds: layout.bounds,
            });
        }
        if sequence > low_mask(layout.segment_bits) {
            return Err(IdError::SequenceOverflow {
                layer,
                sequence,
                bits: layout.segment_bits,
            });
        }

        let b = layout.dim_bits as u32;
        let top = 64 - LAYER_BITS as u32;
        let raw = ((layer as u64) << top)
            | (coord[0] << (top - b))
            | (coord[1] << (top - 2 * b))
            | (coord[2] << (top - 3 * b))
            | sequence;
        Ok(NodeId(raw))
    }

    /// Unpack a node id
    pub fn decode(&self, id: NodeId) -> Result<DecodedId, IdError> {
        let layer = id.layer();
        let layout = self.layout(layer)?;
        let b = layout.dim_bits as u32;
        let top = 64 - LAYER_BITS as u32;
        let dim_mask = low_mask(layout.dim_bits);
        let coord = [
            (id.0 >> (top - b)) & dim_mask,
            (id.0 >> (top - 2 * b)) & dim_mask,
            (id.0 >> (top - 3 * b)) & dim_mask,
        ];
        Ok(DecodedId {
            layer,
            coord,
            sequence: id.0 & low_mask(layout.segment_bits),
        })
    }

    /// Chunk containing `id` (sequence bits cleared)
    pub fn chunk_id(&self, id: NodeId) -> Result<ChunkId, IdError> {
        let layout = self.layout(id.layer())?;
        Ok(ChunkId(id.0 & !low_mask(layout.segment_bits)))
    }

    /// Chunk id for a layer and coordinate
    pub fn chunk_id_at(&self, layer: u8, coord: ChunkCoord) -> Result<ChunkId, IdError> {
        Ok(ChunkId(self.encode(layer, coord, 0)?.0))
    }

    pub fn chunk_coord(&self, id: NodeId) -> Result<ChunkCoord, IdError> {
        Ok(self.decode(id)?.coord)
    }

    /// Node id for a sequence number inside an existing chunk
    pub fn node_in_chunk(&self, chunk: ChunkId, sequence: u64) -> Result<NodeId, IdError> {
        let decoded = self.decode(NodeId(chunk.0))?;
        self.encode(decoded.layer, decoded.coord, sequence)
    }

    /// Inclusive id range covering every node of a chunk
    pub fn chunk_id_range(&self, chunk: ChunkId) -> Result<(NodeId, NodeId), IdError> {
        let layout = self.layout(chunk.layer())?;
        Ok((NodeId(chunk.0), NodeId(chunk.0 | low_mask(layout.segment_bits))))
    }

    /// Chunk at `target_layer` that contains the chunk of `id`
    pub fn parent_chunk_id(&self, id: NodeId, target_layer: u8) -> Result<ChunkId, IdError> {
        let decoded = self.decode(id)?;
        let target = self.layout(target_layer)?;
        let from = grid_level(decoded.layer);
        let to = grid_level(target_layer);
        let divisor = pow_saturating(self.fan_out, to.saturating_sub(from));
        let coord = decoded.coord.map(|c| c / divisor);
        let coord = [
            coord[0].min(target.bounds[0] - 1),
            coord[1].min(target.bounds[1] - 1),
            coord[2].min(target.bounds[2] - 1),
        ];
        self.chunk_id_at(target_layer, coord)
    }

    /// Layer whose nodes an atomic edge joins under a common parent
    ///
    /// Returns 1 when both supervoxels share a chunk (in-chunk edge). Otherwise
    /// returns the highest layer `L` at which the two ancestors still sit in
    /// different chunks; their common parent lives at `L + 1`.
    pub fn cross_chunk_edge_layer(&self, a: NodeId, b: NodeId) -> Result<u8, IdError> {
        let mut ca = self.chunk_coord(a)?;
        let mut cb = self.chunk_coord(b)?;
        let mut layer = 1u8;
        for _ in 2..self.layer_count {
            if ca != cb {
                layer += 1;
            }
            ca = ca.map(|c| c / self.fan_out);
            cb = cb.map(|c| c / self.fan_out);
        }
        Ok(layer)
    }

    /// Chebyshev distance between the chunks of two nodes on the same grid
    pub fn chunk_distance(&self, a: NodeId, b: NodeId) -> Result<u64, IdError> {
        let ca = self.chunk_coord(a)?;
        let cb = self.chunk_coord(b)?;
        Ok((0..3).map(|i| ca[i].abs_diff(cb[i])).max().unwrap_or(0))
    }

    /// Range of supervoxel-grid chunk coordinates covered by a chunk at `layer`
    pub fn chunk_extent_on_base_grid(
        &self,
        layer: u8,
        coord: ChunkCoord,
    ) -> Result<(ChunkCoord, ChunkCoord), IdError> {
        self.layout(layer)?;
        let span = pow_saturating(self.fan_out, grid_level(layer));
        let start = coord.map(|c| c.saturating_mul(span));
        let end = coord.map(|c| c.saturating_add(1).saturating_mul(span) - 1);
        Ok((start, end))
    }
}

/// Position of a layer on the shrinking chunk grid (layers 1 and 2 share level 0)
fn grid_level(layer: u8) -> u8 {
    layer.max(2) - 2
}

fn pow_saturating(base: u64, exp: u8) -> u64 {
    base.checked_pow(exp as u32).unwrap_or(u64::MAX)
}

fn low_mask(bits: u8) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

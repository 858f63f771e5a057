//! Graph Configuration
//!
//! Static parameters fixed when a graph is created: layer count, octree fan-out,
//! chunk grid extent, and the tuning knobs for root locking and multicut.
//!
//! The ID bit layout is derived from these values (see [`crate::models::IdCodec`]),
//! so changing them for an existing graph is never valid.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Width of the layer field at the top of every node ID.
pub const LAYER_BITS: u8 = 8;

/// Largest layer count the layer field can address.
const MAX_LAYER_COUNT: u8 = u8::MAX;

/// Root lock tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lifetime of a root lock claim; an expired claim may be stolen
    pub ttl_ms: u64,

    /// Attempts made by `RootLockManager::acquire` before giving up
    pub max_acquire_attempts: u32,

    /// Base delay between acquisition attempts (doubled per attempt)
    pub backoff_base_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 60_000,
            max_acquire_attempts: 3,
            backoff_base_ms: 10,
        }
    }
}

/// Multicut solver options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MulticutConfig {
    /// Keep each terminal team connected by raising capacities along team paths
    pub path_augment: bool,

    /// Reject minimum cuts that strand a terminal with every incident edge cut
    pub disallow_isolating_cut: bool,

    /// Bounding box padding (voxels) used when a request carries no offset
    pub default_bbox_offset: [u64; 3],
}

impl Default for MulticutConfig {
    fn default() -> Self {
        Self {
            path_augment: true,
            disallow_isolating_cut: true,
            default_bbox_offset: [240, 240, 24],
        }
    }
}

/// Configuration of one chunked graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Human readable graph identifier
    pub graph_id: String,

    /// Number of layers, supervoxels at layer 1, roots at `layer_count`
    pub layer_count: u8,

    /// Chunks merged per axis from one layer to the next (2 == octree)
    pub fan_out: u64,

    /// Number of chunks per axis on the supervoxel grid (layers 1 and 2)
    pub chunk_counts: [u64; 3],

    /// Chunk extent in voxels per axis on the supervoxel grid
    pub chunk_size: [u64; 3],

    /// Smallest acceptable width of the per-chunk sequence field at any layer
    pub min_segment_bits: u8,

    /// Largest Chebyshev distance (in supervoxel chunks) a merge edge may span
    pub max_merge_chunk_distance: u64,

    /// Affinity recorded for merge edges submitted without one
    pub default_merge_affinity: f32,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub multicut: MulticutConfig,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            graph_id: "chunkgraph".to_string(),
            layer_count: 4,
            fan_out: 2,
            chunk_counts: [4, 4, 4],
            chunk_size: [512, 512, 64],
            min_segment_bits: 16,
            max_merge_chunk_distance: 3,
            default_merge_affinity: 1.0,
            lock: LockConfig::default(),
            multicut: MulticutConfig::default(),
        }
    }
}

impl GraphConfig {
    /// Layer count needed so that the top layer holds a single chunk
    ///
    /// Layers 1 and 2 share the supervoxel grid; every layer above divides the
    /// grid by `fan_out`, hence `2 + ceil(log_fan_out(max chunk count))`.
    pub fn min_layer_count(chunk_counts: [u64; 3], fan_out: u64) -> u8 {
        let max_count = chunk_counts.iter().copied().max().unwrap_or(1).max(1);
        let mut layers: u8 = 2;
        let mut span: u64 = 1;
        while span < max_count {
            span = span.saturating_mul(fan_out.max(2));
            layers = layers.saturating_add(1);
        }
        layers.max(3)
    }

    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self =
            serde_json::from_str(json).context("Failed to parse graph configuration JSON")?;
        config
            .validate()
            .map_err(|reason| anyhow::anyhow!("Invalid graph configuration: {}", reason))?;
        Ok(config)
    }

    /// Load a configuration file written as JSON
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read graph configuration {:?}", path))?;
        Self::from_json_str(&raw).with_context(|| format!("In configuration file {:?}", path))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.graph_id.is_empty() {
            return Err("graph_id cannot be empty".to_string());
        }

        if self.fan_out < 2 || !self.fan_out.is_power_of_two() {
            return Err(format!(
                "fan_out must be a power of two >= 2, got {}",
                self.fan_out
            ));
        }

        if self.chunk_counts.iter().any(|&c| c == 0) {
            return Err("chunk_counts must be greater than 0 on every axis".to_string());
        }

        if self.chunk_size.iter().any(|&c| c == 0) {
            return Err("chunk_size must be greater than 0 on every axis".to_string());
        }

        let required = Self::min_layer_count(self.chunk_counts, self.fan_out);
        if self.layer_count < required {
            return Err(format!(
                "layer_count {} is too small for chunk_counts {:?} with fan_out {} (need {})",
                self.layer_count, self.chunk_counts, self.fan_out, required
            ));
        }

        if self.layer_count > MAX_LAYER_COUNT - 1 {
            return Err(format!(
                "layer_count cannot exceed {}",
                MAX_LAYER_COUNT - 1
            ));
        }

        if self.lock.ttl_ms == 0 {
            return Err("lock.ttl_ms must be greater than 0".to_string());
        }

        if self.lock.max_acquire_attempts == 0 {
            return Err("lock.max_acquire_attempts must be at least 1".to_string());
        }

        if !self.default_merge_affinity.is_finite() || self.default_merge_affinity < 0.0 {
            return Err("default_merge_affinity must be a finite, non-negative value".to_string());
        }

        Ok(())
    }

    /// Lock TTL as a chrono duration
    pub fn lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.lock.ttl_ms.min(i64::MAX as u64) as i64)
    }
}

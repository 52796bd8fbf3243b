//! Shared sculpt settings for Chisel
//!
//! This crate is the single source of truth for the per-object sculpt settings
//! that outlive a single brush: symmetry, radial repeats, tiling, axis locks and
//! the evaluation limits used by the stroke pipeline.

use serde::{Deserialize, Serialize};

/// Symmetry bit for the X axis
pub const SYMMETRY_X: u8 = 1 << 0;
/// Symmetry bit for the Y axis
pub const SYMMETRY_Y: u8 = 1 << 1;
/// Symmetry bit for the Z axis
pub const SYMMETRY_Z: u8 = 1 << 2;

/// Default symmetry mask (mirror across X)
pub const DEFAULT_SYMMETRY: u8 = SYMMETRY_X;

/// Default radial repeat count per axis (1 = no radial symmetry)
pub const DEFAULT_RADIAL_COUNT: u32 = 1;

/// Default gravity strength (0 disables gravity)
pub const DEFAULT_GRAVITY_FACTOR: f32 = 0.0;

/// Node count at which per-node work switches to the thread pool
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 4;

/// Maximum undo steps kept in memory
pub const DEFAULT_MAX_UNDO_LEVELS: usize = 32;

/// Maximum leaf size of the spatial tree
pub const DEFAULT_LEAF_LIMIT: usize = 256;

/// Errors raised while loading or validating settings
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Radial count for axis {axis} must be at least 1")]
    RadialCount { axis: usize },
    #[error("Symmetry mask {0:#05b} uses bits outside XYZ")]
    SymmetryMask(u8),
    #[error("Tile offset for axis {axis} must be finite, got {value}")]
    TileOffset { axis: usize, value: f32 },
    #[error("Leaf limit must be positive")]
    LeafLimit,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Per-object sculpt settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SculptSettings {
    /// Mirror symmetry bitmask (bit0 = X, bit1 = Y, bit2 = Z)
    pub symmetry: u8,
    /// Radial repeat count per axis
    pub radial_counts: [u32; 3],
    /// Feather overlapping symmetric brush footprints
    pub symmetry_feather: bool,
    /// Axes (same bit layout as `symmetry`) along which the brush is tiled
    pub tiling_axes: u8,
    /// Tile step per axis in object space
    pub tile_offset: [f32; 3],
    /// Axes (same bit layout as `symmetry`) whose translations are locked
    pub lock_axes: u8,
    /// Gravity strength applied after every deforming brush
    pub gravity_factor: f32,
    /// Node count at which brush evaluation switches to the thread pool
    pub parallel_threshold: usize,
    /// Maximum undo steps kept in memory
    pub max_undo_levels: usize,
    /// Maximum vertices per spatial leaf
    pub leaf_limit: usize,
}

impl Default for SculptSettings {
    fn default() -> Self {
        Self {
            symmetry: DEFAULT_SYMMETRY,
            radial_counts: [DEFAULT_RADIAL_COUNT; 3],
            symmetry_feather: false,
            tiling_axes: 0,
            tile_offset: [1.0; 3],
            lock_axes: 0,
            gravity_factor: DEFAULT_GRAVITY_FACTOR,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            max_undo_levels: DEFAULT_MAX_UNDO_LEVELS,
            leaf_limit: DEFAULT_LEAF_LIMIT,
        }
    }
}

impl SculptSettings {
    /// Settings with symmetry disabled
    pub fn without_symmetry() -> Self {
        Self {
            symmetry: 0,
            ..Default::default()
        }
    }

    /// Parse settings from JSON and validate them
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize settings to pretty JSON
    pub fn to_json_string(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        if self.symmetry & !0b111 != 0 {
            return Err(ConfigError::SymmetryMask(self.symmetry));
        }
        for (axis, &count) in self.radial_counts.iter().enumerate() {
            if count == 0 {
                return Err(ConfigError::RadialCount { axis });
            }
        }
        for (axis, &value) in self.tile_offset.iter().enumerate() {
            if !value.is_finite() {
                return Err(ConfigError::TileOffset { axis, value });
            }
        }
        if self.leaf_limit == 0 {
            return Err(ConfigError::LeafLimit);
        }
        Ok(())
    }

    /// Whether the axis (0 = X, 1 = Y, 2 = Z) is locked
    pub fn is_axis_locked(&self, axis: usize) -> bool {
        self.lock_axes & (1 << axis) != 0
    }

    /// Whether tiling is enabled on the axis (0 = X, 1 = Y, 2 = Z)
    pub fn is_tiled(&self, axis: usize) -> bool {
        self.tiling_axes & (1 << axis) != 0
    }

    /// Whether any radial repeat is configured
    pub fn has_radial_symmetry(&self) -> bool {
        self.radial_counts.iter().any(|&count| count > 1)
    }
}

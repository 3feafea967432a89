//! Engine configuration and the constants shared across the crate.

use crate::error::{Result, ShadeError};

/// Eye height of a standing hiker above the ground (m).
pub const DEFAULT_VIEWER_HEIGHT_M: f64 = 1.7;
/// Marker stored in place of missing heights.
pub const NODATA_VALUE: f32 = -9999.0;
/// Raw heights below this are considered missing and remapped to [`NODATA_VALUE`].
pub const NODATA_THRESHOLD: f32 = -1000.0;

pub const SINGLE_SEARCH_DISTANCE_M: f64 = 500.0;
pub const HIGH_RES_M: f64 = 0.5;
pub const LOW_RES_M: f64 = 15.0;
pub const LOW_RES_SEARCH_DISTANCE_M: f64 = 20_000.0;

/// 2000 m of relief at 5° sun elevation casts a shadow of roughly 22 km.
pub const HORIZON_BUFFER_M: f64 = 22_000.0;
pub const EXTENT_MARGIN_M: f64 = 500.0;
pub const BREAK_SNAP_DISTANCE_M: f64 = 5_000.0;
pub const OFFSET_TRAIL_DISTANCE_M: f64 = 5.0;
/// Latitude of the tropics; beyond it the sun never stands on the poleward side.
pub const TROPIC_LAT_DEG: f64 = 23.4;

/// Search settings for one raster layer.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LayerSpec {
    pub max_distance_m: f64,
    /// Pixel size used to convert pixel distances to meters.
    /// `None` uses the raster's own pixel width.
    pub resolution_m: Option<f64>,
}

impl LayerSpec {
    pub fn new(max_distance_m: f64) -> Self {
        Self {
            max_distance_m,
            resolution_m: None,
        }
    }

    pub fn with_resolution(max_distance_m: f64, resolution_m: f64) -> Self {
        Self {
            max_distance_m,
            resolution_m: Some(resolution_m),
        }
    }

    pub(crate) fn validate(&self, index: usize) -> Result<()> {
        if !(self.max_distance_m.is_finite() && self.max_distance_m > 0.0) {
            return Err(ShadeError::InvalidLayer {
                index,
                reason: format!("max distance {} m must be positive", self.max_distance_m),
            });
        }
        if let Some(res) = self.resolution_m {
            if !(res.is_finite() && res > 0.0) {
                return Err(ShadeError::InvalidLayer {
                    index,
                    reason: format!("resolution {} m must be positive", res),
                });
            }
        }
        Ok(())
    }
}

/// Layers are ordered finest to coarsest.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    pub viewer_height_m: f64,
    pub layers: Vec<LayerSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::single()
    }
}

impl EngineConfig {
    /// One surface model searched up to 500 m.
    pub fn single() -> Self {
        Self {
            viewer_height_m: DEFAULT_VIEWER_HEIGHT_M,
            layers: vec![LayerSpec::new(SINGLE_SEARCH_DISTANCE_M)],
        }
    }

    /// A high-resolution model near the trail plus a coarse one reaching
    /// distant relief such as mountain ranges.
    pub fn dual() -> Self {
        Self {
            viewer_height_m: DEFAULT_VIEWER_HEIGHT_M,
            layers: vec![
                LayerSpec::with_resolution(SINGLE_SEARCH_DISTANCE_M, HIGH_RES_M),
                LayerSpec::with_resolution(LOW_RES_SEARCH_DISTANCE_M, LOW_RES_M),
            ],
        }
    }

    pub fn with_viewer_height(mut self, viewer_height_m: f64) -> Self {
        self.viewer_height_m = viewer_height_m;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.viewer_height_m.is_finite() && self.viewer_height_m >= 0.0) {
            return Err(ShadeError::InvalidViewerHeight(self.viewer_height_m));
        }
        if self.layers.is_empty() {
            return Err(ShadeError::NoLayers);
        }
        self.layers
            .iter()
            .enumerate()
            .try_for_each(|(i, layer)| layer.validate(i))
    }
}

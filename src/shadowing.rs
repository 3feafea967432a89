//! Sun/shade classification of trail points against height rasters.
//!
//! Rasters are scanned finest to coarsest along the sun's azimuth. A
//! coarse layer only contributes obstructions beyond the distance already
//! traced on the finer layers before it, so the same terrain is never
//! counted twice at two resolutions.

use log::{debug, info};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::{EngineConfig, LayerSpec};
use crate::error::{Result, ShadeError};
use crate::horizon::{pixel_distance, trace};
use crate::raster::{is_nodata, HeightRaster};
use crate::sun::normalize_azimuth;
use crate::trail::TrailPoint;

#[cfg(feature = "python")]
use crate::config::DEFAULT_VIEWER_HEIGHT_M;
#[cfg(feature = "python")]
use crate::raster::PyHeightRaster;
#[cfg(feature = "python")]
use crate::trail::GeoPoint;
#[cfg(feature = "python")]
use numpy::{IntoPyArray, PyArray1, PyReadonlyArray1};
#[cfg(feature = "python")]
use pyo3::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ShadowFlag {
    Sunny = 0,
    Shady = 1,
}

impl ShadowFlag {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_shady(self) -> bool {
        self == ShadowFlag::Shady
    }
}

/// Why a point was classified the way it was.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ShadowVerdict {
    /// The sun is below the horizon.
    Night,
    /// Terrain on layer `layer` rises above the sun; `angle_rad` is that
    /// layer's highest obstruction angle.
    Obstructed { layer: usize, angle_rad: f64 },
    /// Nothing rises above the sun. `max_angle_rad` is the highest
    /// obstruction angle seen, `None` when no pixel rose above eye level.
    Clear { max_angle_rad: Option<f64> },
    /// The point lies outside every raster and is reported sunny.
    Uncovered,
}

impl ShadowVerdict {
    pub fn flag(&self) -> ShadowFlag {
        match self {
            ShadowVerdict::Night | ShadowVerdict::Obstructed { .. } => ShadowFlag::Shady,
            ShadowVerdict::Clear { .. } | ShadowVerdict::Uncovered => ShadowFlag::Sunny,
        }
    }
}

/// One raster with the distance to search on it.
#[derive(Debug, Clone)]
pub struct ScanLayer {
    raster: Arc<HeightRaster>,
    max_distance_m: f64,
    resolution_m: f64,
}

impl ScanLayer {
    pub fn new(raster: Arc<HeightRaster>, spec: LayerSpec) -> Result<Self> {
        spec.validate(0)?;
        let resolution_m = spec.resolution_m.unwrap_or_else(|| raster.pixel_width());
        Ok(Self {
            raster,
            max_distance_m: spec.max_distance_m,
            resolution_m,
        })
    }

    pub fn raster(&self) -> &HeightRaster {
        &self.raster
    }

    pub fn max_distance_m(&self) -> f64 {
        self.max_distance_m
    }

    pub fn resolution_m(&self) -> f64 {
        self.resolution_m
    }

    pub fn max_dist_px(&self) -> f64 {
        self.max_distance_m / self.resolution_m
    }
}

/// Result of scanning a single layer.
struct LayerScan {
    /// Highest obstruction angle beyond the covered distance.
    max_angle: Option<f64>,
    /// Distance of the farthest traced pixel (m).
    reach_m: f64,
}

/// Traces one layer from the pixel holding the viewer. `None` when the
/// viewer lies outside this raster.
fn scan_layer(
    layer: &ScanLayer,
    x: f64,
    y: f64,
    eye_level: f64,
    azimuth_rad: f64,
    covered_m: f64,
) -> Option<LayerScan> {
    let raster = layer.raster();
    let start = raster.locate(x, y)?;
    let ray = trace(
        start.0,
        start.1,
        layer.max_dist_px(),
        azimuth_rad,
        raster.rows(),
        raster.cols(),
    );

    let reach_m = ray
        .last()
        .map_or(0.0, |&px| pixel_distance(px, start) * layer.resolution_m);

    // Nothing on this raster can rise above the viewer
    if raster.max_height().map_or(true, |h| f64::from(h) <= eye_level) {
        return Some(LayerScan {
            max_angle: None,
            reach_m,
        });
    }

    let heights = raster.heights();
    let max_angle = ray
        .iter()
        .filter_map(|&(col, row)| {
            let h = heights[[row, col]];
            if is_nodata(h) || f64::from(h) <= eye_level {
                return None;
            }
            let distance_m = pixel_distance((col, row), start) * layer.resolution_m;
            if distance_m == 0.0 || distance_m <= covered_m {
                return None;
            }
            Some(((f64::from(h) - eye_level) / distance_m).atan())
        })
        .fold(None, |acc: Option<f64>, a| Some(acc.map_or(a, |m| m.max(a))));

    Some(LayerScan { max_angle, reach_m })
}

/// Classifies one trail point against `layers` (finest first).
pub fn evaluate_detailed(
    point: &TrailPoint,
    layers: &[ScanLayer],
    viewer_offset_m: f64,
) -> ShadowVerdict {
    let sun = point.solar();
    if sun.elevation_rad < 0.0 {
        return ShadowVerdict::Night;
    }

    let eye_level = viewer_offset_m + point.z();
    let azimuth = normalize_azimuth(sun.azimuth_rad - point.grid_convergence_rad());

    let mut max_angle: Option<f64> = None;
    let mut covered_m = 0.0_f64;
    let mut scanned_any = false;

    for (i, layer) in layers.iter().enumerate() {
        let Some(scan) = scan_layer(layer, point.x(), point.y(), eye_level, azimuth, covered_m)
        else {
            continue;
        };
        scanned_any = true;

        if let Some(angle) = scan.max_angle {
            if angle > sun.elevation_rad {
                // Coarser layers could only add obstructions
                return ShadowVerdict::Obstructed {
                    layer: i,
                    angle_rad: angle,
                };
            }
            max_angle = Some(max_angle.map_or(angle, |m| m.max(angle)));
        }
        covered_m = covered_m.max(scan.reach_m);
    }

    if !scanned_any {
        return ShadowVerdict::Uncovered;
    }
    ShadowVerdict::Clear {
        max_angle_rad: max_angle,
    }
}

pub fn evaluate(point: &TrailPoint, layers: &[ScanLayer], viewer_offset_m: f64) -> ShadowFlag {
    evaluate_detailed(point, layers, viewer_offset_m).flag()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShadowSummary {
    pub sunny: usize,
    pub shady: usize,
}

impl ShadowSummary {
    pub fn from_flags(flags: &[ShadowFlag]) -> Self {
        let shady = flags.iter().filter(|f| f.is_shady()).count();
        Self {
            sunny: flags.len() - shady,
            shady,
        }
    }

    pub fn total(&self) -> usize {
        self.sunny + self.shady
    }

    /// Share of shady points in [0, 1]; 0 for an empty trail.
    pub fn shady_fraction(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.shady as f64 / self.total() as f64
        }
    }
}

/// Immutable set of layers plus viewer settings, shareable across threads.
#[derive(Debug, Clone)]
pub struct ShadowEngine {
    layers: Vec<ScanLayer>,
    viewer_height_m: f64,
}

impl ShadowEngine {
    /// Pairs `rasters` (finest first) with the layer specs of `config`.
    pub fn new(rasters: Vec<Arc<HeightRaster>>, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        if rasters.len() != config.layers.len() {
            return Err(ShadeError::LengthMismatch {
                what: "rasters",
                expected: config.layers.len(),
                actual: rasters.len(),
            });
        }
        let layers = rasters
            .into_iter()
            .zip(&config.layers)
            .enumerate()
            .map(|(i, (raster, spec))| {
                ScanLayer::new(raster, *spec).map_err(|e| match e {
                    ShadeError::InvalidLayer { reason, .. } => {
                        ShadeError::InvalidLayer { index: i, reason }
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_layers(layers, config.viewer_height_m)
    }

    pub fn from_layers(layers: Vec<ScanLayer>, viewer_height_m: f64) -> Result<Self> {
        if layers.is_empty() {
            return Err(ShadeError::NoLayers);
        }
        if !(viewer_height_m.is_finite() && viewer_height_m >= 0.0) {
            return Err(ShadeError::InvalidViewerHeight(viewer_height_m));
        }
        for (i, layer) in layers.iter().enumerate() {
            debug!(
                "layer {}: {}x{} px at {} m, searching {} m ({:.0} px)",
                i,
                layer.raster.cols(),
                layer.raster.rows(),
                layer.resolution_m,
                layer.max_distance_m,
                layer.max_dist_px()
            );
        }
        Ok(Self {
            layers,
            viewer_height_m,
        })
    }

    pub fn layers(&self) -> &[ScanLayer] {
        &self.layers
    }

    pub fn viewer_height_m(&self) -> f64 {
        self.viewer_height_m
    }

    pub fn evaluate(&self, point: &TrailPoint) -> ShadowFlag {
        evaluate(point, &self.layers, self.viewer_height_m)
    }

    pub fn evaluate_detailed(&self, point: &TrailPoint) -> ShadowVerdict {
        evaluate_detailed(point, &self.layers, self.viewer_height_m)
    }

    /// One flag per point, in input order.
    pub fn evaluate_trail(&self, points: &[TrailPoint]) -> Vec<ShadowFlag> {
        let flags: Vec<ShadowFlag> = points.par_iter().map(|p| self.evaluate(p)).collect();
        log_summary(&flags, self.layers.len());
        flags
    }

    /// Like [`evaluate_trail`](Self::evaluate_trail), reporting the number
    /// of finished points to `progress_counter` and stopping between points
    /// once `cancel_flag` is raised.
    pub fn evaluate_trail_with(
        &self,
        points: &[TrailPoint],
        progress_counter: Option<Arc<AtomicUsize>>,
        cancel_flag: Option<Arc<AtomicBool>>,
    ) -> Result<Vec<ShadowFlag>> {
        if let Some(ref counter) = progress_counter {
            counter.store(0, Ordering::Relaxed);
        }
        let progress_ref = &progress_counter;
        let cancel_ref = &cancel_flag;

        let flags: Option<Vec<ShadowFlag>> = points
            .par_iter()
            .map(|p| {
                if let Some(ref flag) = cancel_ref {
                    if flag.load(Ordering::Relaxed) {
                        return None;
                    }
                }
                let result = self.evaluate(p);
                if let Some(ref counter) = progress_ref {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                Some(result)
            })
            .collect();

        let cancelled = cancel_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed));
        match flags {
            Some(flags) if !cancelled => {
                log_summary(&flags, self.layers.len());
                Ok(flags)
            }
            _ => Err(ShadeError::Cancelled),
        }
    }
}

fn log_summary(flags: &[ShadowFlag], layer_count: usize) {
    let summary = ShadowSummary::from_flags(flags);
    info!(
        "evaluated {} trail points on {} layer(s): {:.1}% shady",
        summary.total(),
        layer_count,
        summary.shady_fraction() * 100.0
    );
}

#[cfg(feature = "python")]
#[pyclass]
/// Evaluates trails off the GIL; poll `progress()` or call `cancel()` from
/// another Python thread.
pub struct ShadowRunner {
    progress: Arc<AtomicUsize>,
    cancelled: Arc<AtomicBool>,
}

#[cfg(feature = "python")]
impl Default for ShadowRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "python")]
#[pymethods]
impl ShadowRunner {
    #[new]
    pub fn new() -> Self {
        Self {
            progress: Arc::new(AtomicUsize::new(0)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn progress(&self) -> usize {
        self.progress.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns a uint8 array: 0 = sunny, 1 = shady.
    #[pyo3(signature = (
        xs, ys, zs, lats, lons, unix_seconds, rasters, max_distances,
        viewer_height=DEFAULT_VIEWER_HEIGHT_M
    ))]
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &self,
        py: Python,
        xs: PyReadonlyArray1<f64>,
        ys: PyReadonlyArray1<f64>,
        zs: PyReadonlyArray1<f64>,
        lats: PyReadonlyArray1<f64>,
        lons: PyReadonlyArray1<f64>,
        unix_seconds: PyReadonlyArray1<i64>,
        rasters: Vec<PyRef<PyHeightRaster>>,
        max_distances: Vec<f64>,
        viewer_height: f64,
    ) -> PyResult<Py<PyArray1<u8>>> {
        let (xs, ys, zs) = (xs.as_array(), ys.as_array(), zs.as_array());
        let (lats, lons, secs) = (lats.as_array(), lons.as_array(), unix_seconds.as_array());
        let n = xs.len();
        for (what, len) in [
            ("ys", ys.len()),
            ("zs", zs.len()),
            ("lats", lats.len()),
            ("lons", lons.len()),
            ("unix_seconds", secs.len()),
        ] {
            if len != n {
                return Err(ShadeError::LengthMismatch {
                    what,
                    expected: n,
                    actual: len,
                }
                .into());
            }
        }

        let config = EngineConfig {
            viewer_height_m: viewer_height,
            layers: max_distances.into_iter().map(LayerSpec::new).collect(),
        };
        let rasters: Vec<Arc<HeightRaster>> = rasters.iter().map(|r| r.inner.clone()).collect();
        let engine = ShadowEngine::new(rasters, &config)?;

        let points = (0..n)
            .map(|i| {
                let time = chrono::DateTime::from_timestamp(secs[i], 0).ok_or_else(|| {
                    pyo3::exceptions::PyValueError::new_err(format!(
                        "timestamp {} is out of range",
                        secs[i]
                    ))
                })?;
                let location = GeoPoint::new(xs[i], ys[i], lats[i], lons[i]);
                Ok(TrailPoint::new(location, zs[i], time, &crate::sun::SpencerModel)?.with_index(i))
            })
            .collect::<PyResult<Vec<_>>>()?;

        self.progress.store(0, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
        let progress = self.progress.clone();
        let cancelled = self.cancelled.clone();
        let flags = py.allow_threads(|| {
            engine.evaluate_trail_with(&points, Some(progress), Some(cancelled))
        })?;

        let out: Vec<u8> = flags.iter().map(|f| f.as_u8()).collect();
        Ok(ndarray::Array1::from(out).into_pyarray(py).unbind())
    }
}

//! Georeferenced height rasters (surface or terrain models).

use log::warn;
use ndarray::{Array2, ArrayView2};
use ndarray_stats::QuantileExt;

use crate::config::{HORIZON_BUFFER_M, NODATA_THRESHOLD, NODATA_VALUE, TROPIC_LAT_DEG};
use crate::error::{Result, ShadeError};

#[cfg(feature = "python")]
use numpy::PyReadonlyArray2;
#[cfg(feature = "python")]
use pyo3::prelude::*;
#[cfg(feature = "python")]
use std::sync::Arc;

/// North-up affine mapping between pixel indices and projected coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoTransform {
    /// World x of the top-left corner of pixel (0, 0).
    pub origin_x: f64,
    /// World y of the top-left corner of pixel (0, 0).
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Negative for north-up rasters.
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Result<Self> {
        let valid = origin_x.is_finite()
            && origin_y.is_finite()
            && pixel_width.is_finite()
            && pixel_height.is_finite()
            && pixel_width > 0.0
            && pixel_height != 0.0;
        if !valid {
            return Err(ShadeError::InvalidGeoTransform {
                pixel_width,
                pixel_height,
            });
        }
        Ok(Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        })
    }

    /// Square pixels, top-left origin, y decreasing downwards.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_size: f64) -> Result<Self> {
        Self::new(origin_x, origin_y, pixel_size, -pixel_size)
    }

    /// From a GDAL geotransform `[x0, dx, rot, y0, rot, dy]`.
    pub fn from_gdal(gt: [f64; 6]) -> Result<Self> {
        if gt[2] != 0.0 || gt[4] != 0.0 {
            return Err(ShadeError::RotatedGeoTransform {
                row_rotation: gt[2],
                col_rotation: gt[4],
            });
        }
        Self::new(gt[0], gt[3], gt[1], gt[5])
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            0.0,
            self.origin_y,
            0.0,
            self.pixel_height,
        ]
    }

    /// Pixel containing the world point, as signed (col, row).
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (i64, i64) {
        let col = ((x - self.origin_x) / self.pixel_width).floor();
        let row = ((y - self.origin_y) / self.pixel_height).floor();
        (col as i64, row as i64)
    }

    /// World coordinates of the pixel centre.
    pub fn pixel_to_world(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }
}

/// Axis-aligned rectangle in projected coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn from_points<I: IntoIterator<Item = (f64, f64)>>(points: I) -> Option<Self> {
        points.into_iter().fold(None, |acc, (x, y)| {
            Some(match acc {
                None => Extent {
                    min_x: x,
                    min_y: y,
                    max_x: x,
                    max_y: y,
                },
                Some(e) => Extent {
                    min_x: e.min_x.min(x),
                    min_y: e.min_y.min(y),
                    max_x: e.max_x.max(x),
                    max_y: e.max_y.max(y),
                },
            })
        })
    }

    pub fn grow(&self, margin: f64) -> Self {
        Self {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.min_x <= x && x <= self.max_x && self.min_y <= y && y <= self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Area a coarse horizon raster must cover around a trail extent.
    ///
    /// Outside the tropics the sun never stands on the poleward side, so
    /// that side needs no buffer.
    pub fn horizon_buffer(&self, center_lat_deg: f64) -> Self {
        let north = if center_lat_deg > TROPIC_LAT_DEG {
            0.0
        } else {
            HORIZON_BUFFER_M
        };
        let south = if center_lat_deg < -TROPIC_LAT_DEG {
            0.0
        } else {
            HORIZON_BUFFER_M
        };
        Self {
            min_x: self.min_x - HORIZON_BUFFER_M,
            min_y: self.min_y - south,
            max_x: self.max_x + HORIZON_BUFFER_M,
            max_y: self.max_y + north,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterContent {
    Valid,
    /// No height above the nodata marker.
    AllNoData,
    /// Every valid height is identical; usually a failed export.
    Flat,
}

pub fn is_nodata(height: f32) -> bool {
    height <= NODATA_VALUE
}

/// Read-only height grid, indexed `[row, col]`.
#[derive(Debug, Clone)]
pub struct HeightRaster {
    heights: Array2<f32>,
    transform: GeoTransform,
    min_height: Option<f32>,
    max_height: Option<f32>,
}

impl HeightRaster {
    pub fn new(heights: Array2<f32>, transform: GeoTransform) -> Result<Self> {
        let (rows, cols) = heights.dim();
        if rows == 0 || cols == 0 {
            return Err(ShadeError::EmptyRaster { rows, cols });
        }
        // Re-check in case the transform was built field by field
        let transform = GeoTransform::new(
            transform.origin_x,
            transform.origin_y,
            transform.pixel_width,
            transform.pixel_height,
        )?;

        let (min_height, max_height) = valid_height_range(heights.view());
        let raster = Self {
            heights,
            transform,
            min_height,
            max_height,
        };
        match raster.content() {
            RasterContent::Valid => {}
            RasterContent::AllNoData => {
                warn!("height raster {}x{} has no valid heights", rows, cols)
            }
            RasterContent::Flat => warn!(
                "height raster {}x{} is flat at {} m",
                rows,
                cols,
                raster.max_height.unwrap_or(NODATA_VALUE)
            ),
        }
        Ok(raster)
    }

    /// Builds a raster from raw loader output, mapping every height below
    /// the nodata threshold onto the nodata marker first.
    pub fn with_nodata_remap(mut heights: Array2<f32>, transform: GeoTransform) -> Result<Self> {
        heights.par_mapv_inplace(|h| if h < NODATA_THRESHOLD { NODATA_VALUE } else { h });
        Self::new(heights, transform)
    }

    pub fn rows(&self) -> usize {
        self.heights.nrows()
    }

    pub fn cols(&self) -> usize {
        self.heights.ncols()
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn heights(&self) -> ArrayView2<'_, f32> {
        self.heights.view()
    }

    pub fn pixel_width(&self) -> f64 {
        self.transform.pixel_width
    }

    /// Highest valid height, `None` when every cell is nodata.
    pub fn max_height(&self) -> Option<f32> {
        self.max_height
    }

    pub fn min_height(&self) -> Option<f32> {
        self.min_height
    }

    pub fn content(&self) -> RasterContent {
        match (self.min_height, self.max_height) {
            (Some(lo), Some(hi)) if lo == hi => RasterContent::Flat,
            (Some(_), Some(_)) => RasterContent::Valid,
            _ => RasterContent::AllNoData,
        }
    }

    pub fn world_to_pixel(&self, x: f64, y: f64) -> (i64, i64) {
        self.transform.world_to_pixel(x, y)
    }

    pub fn pixel_to_world(&self, col: usize, row: usize) -> (f64, f64) {
        self.transform.pixel_to_world(col, row)
    }

    pub fn contains(&self, col: i64, row: i64) -> bool {
        col >= 0 && row >= 0 && (col as usize) < self.cols() && (row as usize) < self.rows()
    }

    /// In-bounds pixel holding the world point, if any.
    pub fn locate(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if !(x.is_finite() && y.is_finite()) {
            return None;
        }
        let (col, row) = self.world_to_pixel(x, y);
        self.contains(col, row).then(|| (col as usize, row as usize))
    }

    pub fn height_at(&self, col: i64, row: i64) -> Result<f32> {
        if !self.contains(col, row) {
            return Err(ShadeError::OutOfBounds {
                col,
                row,
                cols: self.cols(),
                rows: self.rows(),
            });
        }
        Ok(self.heights[[row as usize, col as usize]])
    }

    /// Nearest-pixel height at a world point; `None` outside the raster or on nodata.
    pub fn sample(&self, x: f64, y: f64) -> Option<f32> {
        let (col, row) = self.locate(x, y)?;
        let h = self.heights[[row, col]];
        (!is_nodata(h) && h.is_finite()).then_some(h)
    }

    pub fn extent(&self) -> Extent {
        let t = &self.transform;
        let x_end = t.origin_x + self.cols() as f64 * t.pixel_width;
        let y_end = t.origin_y + self.rows() as f64 * t.pixel_height;
        Extent {
            min_x: t.origin_x,
            min_y: t.origin_y.min(y_end),
            max_x: x_end,
            max_y: t.origin_y.max(y_end),
        }
    }
}

fn valid_height_range(heights: ArrayView2<f32>) -> (Option<f32>, Option<f32>) {
    let valid = heights.mapv(|h| if is_nodata(h) { f32::NAN } else { h });
    let lo = *valid.min_skipnan();
    let hi = *valid.max_skipnan();
    if lo.is_nan() || hi.is_nan() {
        (None, None)
    } else {
        (Some(lo), Some(hi))
    }
}

#[cfg(feature = "python")]
#[pyclass(name = "HeightRaster")]
/// Height raster shared read-only with the shadow engine.
pub struct PyHeightRaster {
    pub(crate) inner: Arc<HeightRaster>,
}

#[cfg(feature = "python")]
#[pymethods]
impl PyHeightRaster {
    #[new]
    #[pyo3(signature = (heights, geotransform, remap_nodata=true))]
    pub fn new(
        heights: PyReadonlyArray2<f32>,
        geotransform: [f64; 6],
        remap_nodata: bool,
    ) -> PyResult<Self> {
        let transform = GeoTransform::from_gdal(geotransform)?;
        let heights = heights.as_array().to_owned();
        let raster = if remap_nodata {
            HeightRaster::with_nodata_remap(heights, transform)?
        } else {
            HeightRaster::new(heights, transform)?
        };
        Ok(Self {
            inner: Arc::new(raster),
        })
    }

    #[getter]
    pub fn rows(&self) -> usize {
        self.inner.rows()
    }

    #[getter]
    pub fn cols(&self) -> usize {
        self.inner.cols()
    }

    #[getter]
    pub fn geotransform(&self) -> [f64; 6] {
        self.inner.transform().to_gdal()
    }

    pub fn is_valid(&self) -> bool {
        self.inner.content() == RasterContent::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn small_raster() -> HeightRaster {
        let heights = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        HeightRaster::new(heights, GeoTransform::north_up(1000.0, 2000.0, 10.0).unwrap()).unwrap()
    }

    #[test]
    fn test_rejects_bad_transforms() {
        assert!(GeoTransform::new(0.0, 0.0, 0.0, -1.0).is_err());
        assert!(GeoTransform::new(0.0, 0.0, 1.0, 0.0).is_err());
        assert!(GeoTransform::new(0.0, 0.0, -1.0, -1.0).is_err());
        assert!(GeoTransform::new(0.0, f64::NAN, 1.0, -1.0).is_err());
        assert!(matches!(
            GeoTransform::from_gdal([0.0, 1.0, 0.2, 0.0, 0.0, -1.0]),
            Err(ShadeError::RotatedGeoTransform { .. })
        ));
    }

    #[test]
    fn test_rejects_empty_raster() {
        let t = GeoTransform::north_up(0.0, 0.0, 1.0).unwrap();
        assert_eq!(
            HeightRaster::new(Array2::zeros((0, 4)), t).unwrap_err(),
            ShadeError::EmptyRaster { rows: 0, cols: 4 }
        );
    }

    #[test]
    fn test_gdal_round_trip() {
        let gt = [700000.0, 0.5, 0.0, 6600000.0, 0.0, -0.5];
        assert_eq!(GeoTransform::from_gdal(gt).unwrap().to_gdal(), gt);
    }

    #[test]
    fn test_world_to_pixel() {
        let r = small_raster();
        assert_eq!(r.world_to_pixel(1000.0, 2000.0), (0, 0));
        assert_eq!(r.world_to_pixel(1025.0, 1985.0), (2, 1));
        // Points left of / above the origin floor to negative indices
        assert_eq!(r.world_to_pixel(999.0, 2001.0), (-1, -1));
        assert_eq!(r.locate(1025.0, 1985.0), Some((2, 1)));
        assert_eq!(r.locate(1031.0, 1985.0), None);
        assert_eq!(r.locate(f64::NAN, 1985.0), None);
    }

    #[test]
    fn test_pixel_to_world_is_centre() {
        let r = small_raster();
        let (x, y) = r.pixel_to_world(2, 1);
        assert_abs_diff_eq!(x, 1025.0);
        assert_abs_diff_eq!(y, 1985.0);
        assert_eq!(r.locate(x, y), Some((2, 1)));
    }

    #[test]
    fn test_height_at_bounds() {
        let r = small_raster();
        assert_eq!(r.height_at(2, 1).unwrap(), 6.0);
        assert_eq!(r.height_at(0, 0).unwrap(), 1.0);
        assert!(matches!(
            r.height_at(3, 0),
            Err(ShadeError::OutOfBounds { col: 3, row: 0, cols: 3, rows: 2 })
        ));
        assert!(r.height_at(0, -1).is_err());
    }

    #[test]
    fn test_sample() {
        let t = GeoTransform::north_up(0.0, 2.0, 1.0).unwrap();
        let r = HeightRaster::new(array![[3.5, NODATA_VALUE], [1.0, 2.0]], t).unwrap();
        assert_eq!(r.sample(0.2, 1.9), Some(3.5));
        assert_eq!(r.sample(1.2, 1.9), None);
        assert_eq!(r.sample(1.2, 0.1), Some(2.0));
        assert_eq!(r.sample(5.0, 0.1), None);
    }

    #[test]
    fn test_nodata_remap_and_range() {
        let heights = array![[-32768.0, 12.0], [-1000.0, 40.0]];
        let r =
            HeightRaster::with_nodata_remap(heights, GeoTransform::north_up(0.0, 2.0, 1.0).unwrap())
                .unwrap();
        assert_eq!(r.height_at(0, 0).unwrap(), NODATA_VALUE);
        // The threshold itself is a real (if odd) height
        assert_eq!(r.height_at(0, 1).unwrap(), -1000.0);
        assert_eq!(r.max_height(), Some(40.0));
        assert_eq!(r.min_height(), Some(-1000.0));
        assert_eq!(r.content(), RasterContent::Valid);
    }

    #[test]
    fn test_content_checks() {
        let t = GeoTransform::north_up(0.0, 2.0, 1.0).unwrap();
        let flat = HeightRaster::new(Array2::from_elem((2, 2), 7.0), t).unwrap();
        assert_eq!(flat.content(), RasterContent::Flat);

        let empty = HeightRaster::new(Array2::from_elem((2, 2), NODATA_VALUE), t).unwrap();
        assert_eq!(empty.content(), RasterContent::AllNoData);
        assert_eq!(empty.max_height(), None);
    }

    #[test]
    fn test_extent() {
        let e = small_raster().extent();
        assert_eq!(
            e,
            Extent {
                min_x: 1000.0,
                min_y: 1980.0,
                max_x: 1030.0,
                max_y: 2000.0
            }
        );
        assert!(e.contains(1015.0, 1990.0));
        assert!(!e.contains(1015.0, 2010.0));
    }

    #[test]
    fn test_horizon_buffer_drops_poleward_side() {
        let e = Extent {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 100.0,
            max_y: 100.0,
        };
        let north = e.horizon_buffer(45.0);
        assert_eq!(north.max_y, 100.0);
        assert_eq!(north.min_y, -22_000.0);
        assert_eq!(north.min_x, -22_000.0);

        let south = e.horizon_buffer(-30.0);
        assert_eq!(south.min_y, 0.0);
        assert_eq!(south.max_y, 22_100.0);

        let tropics = e.horizon_buffer(10.0);
        assert_eq!(tropics.width(), 44_100.0);
        assert_eq!(tropics.height(), 44_100.0);
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShadeError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ShadeError {
    #[error("invalid geotransform: pixel width {pixel_width} and height {pixel_height} must be finite, width > 0 and height != 0")]
    InvalidGeoTransform { pixel_width: f64, pixel_height: f64 },

    #[error("rotated or skewed geotransforms are not supported (terms {row_rotation}, {col_rotation})")]
    RotatedGeoTransform { row_rotation: f64, col_rotation: f64 },

    #[error("raster must have at least one row and one column, got {rows}x{cols}")]
    EmptyRaster { rows: usize, cols: usize },

    #[error("pixel ({col}, {row}) is outside the {cols}x{rows} raster")]
    OutOfBounds {
        col: i64,
        row: i64,
        cols: usize,
        rows: usize,
    },

    #[error("at least one height raster layer is required")]
    NoLayers,

    #[error("invalid layer {index}: {reason}")]
    InvalidLayer { index: usize, reason: String },

    #[error("invalid viewer height {0} m")]
    InvalidViewerHeight(f64),

    #[error("coordinates out of range: lat {lat}, lon {lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("year {year} is outside the {model} model range")]
    UnsupportedDate { model: &'static str, year: i32 },

    #[error("trail timestamps must be non-decreasing (index {index})")]
    NonMonotonicTimes { index: usize },

    #[error("expected {expected} values for {what}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("shadow evaluation cancelled")]
    Cancelled,
}

#[cfg(feature = "python")]
impl From<ShadeError> for pyo3::PyErr {
    fn from(err: ShadeError) -> Self {
        pyo3::exceptions::PyValueError::new_err(err.to_string())
    }
}

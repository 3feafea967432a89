#[cfg(feature = "python")]
use pyo3::prelude::*;

pub mod config;
pub mod error;
pub mod horizon;
pub mod raster;
pub mod shadowing;
pub mod sun;
pub mod trail;

pub use config::{EngineConfig, LayerSpec};
pub use error::{Result, ShadeError};
pub use raster::{Extent, GeoTransform, HeightRaster, RasterContent};
pub use shadowing::{ScanLayer, ShadowEngine, ShadowFlag, ShadowSummary, ShadowVerdict};
pub use sun::{AlmanacModel, FallbackModel, SolarPosition, SpencerModel, SunPositionModel};
pub use trail::{GeoPoint, Trail, TrailCategory, TrailPoint};

#[cfg(feature = "python")]
#[pymodule]
fn trailshade(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    // Register submodules
    register_sun_module(py_module)?;
    register_raster_module(py_module)?;
    register_shadowing_module(py_module)?;

    py_module.add("__doc__", "Sun and shade along hiking trails, computed in Rust.")?;

    Ok(())
}

#[cfg(feature = "python")]
fn register_sun_module(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    let submodule = PyModule::new(py_module.py(), "sun")?;
    submodule.add("__doc__", "Solar position.")?;
    submodule.add_function(wrap_pyfunction!(sun::sun_position, &submodule)?)?;
    py_module.add_submodule(&submodule)?;
    Ok(())
}

#[cfg(feature = "python")]
fn register_raster_module(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    let submodule = PyModule::new(py_module.py(), "raster")?;
    submodule.add("__doc__", "Georeferenced height rasters.")?;
    submodule.add_class::<raster::PyHeightRaster>()?;
    submodule.add("NODATA_VALUE", config::NODATA_VALUE)?;
    py_module.add_submodule(&submodule)?;
    Ok(())
}

#[cfg(feature = "python")]
fn register_shadowing_module(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    let submodule = PyModule::new(py_module.py(), "shadowing")?;
    submodule.add("__doc__", "Trail shadow evaluation.")?;
    // Expose the ShadowRunner class so Python can create a runner and poll progress()
    submodule.add_class::<shadowing::ShadowRunner>()?;
    submodule.add("DEFAULT_VIEWER_HEIGHT_M", config::DEFAULT_VIEWER_HEIGHT_M)?;
    py_module.add_submodule(&submodule)?;
    Ok(())
}

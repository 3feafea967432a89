//! Solar position models.
//!
//! [`SpencerModel`] is the reference formula (Spencer's Fourier series for
//! declination and equation of time) and is always available. Other models
//! can be plugged in through [`SunPositionModel`] and composed with a
//! fallback via [`FallbackModel`].

use chrono::{DateTime, Datelike, Timelike, Utc};
use log::warn;
use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, ShadeError};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Sun direction seen from a point on the ground.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolarPosition {
    /// Angle above the horizontal plane, in [-π/2, π/2].
    pub elevation_rad: f64,
    /// Compass bearing clockwise from true north, in [0, 2π).
    pub azimuth_rad: f64,
}

impl SolarPosition {
    pub fn from_components(elevation_rad: f64, azimuth_rad: f64) -> Self {
        Self {
            elevation_rad: elevation_rad.clamp(-FRAC_PI_2, FRAC_PI_2),
            azimuth_rad: normalize_azimuth(azimuth_rad),
        }
    }

    pub fn is_daytime(&self) -> bool {
        self.elevation_rad >= 0.0
    }
}

/// Wrap an angle into [0, 2π).
pub(crate) fn normalize_azimuth(azimuth_rad: f64) -> f64 {
    let wrapped = azimuth_rad.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

pub trait SunPositionModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn position(&self, lat_deg: f64, lon_deg: f64, utc: DateTime<Utc>) -> Result<SolarPosition>;
}

impl<M: SunPositionModel + ?Sized> SunPositionModel for Box<M> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn position(&self, lat_deg: f64, lon_deg: f64, utc: DateTime<Utc>) -> Result<SolarPosition> {
        (**self).position(lat_deg, lon_deg, utc)
    }
}

impl<M: SunPositionModel + ?Sized> SunPositionModel for Arc<M> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn position(&self, lat_deg: f64, lon_deg: f64, utc: DateTime<Utc>) -> Result<SolarPosition> {
        (**self).position(lat_deg, lon_deg, utc)
    }
}

fn decimal_hour(utc: &DateTime<Utc>) -> f64 {
    utc.hour() as f64 + utc.minute() as f64 / 60.0 + utc.second() as f64 / 3600.0
}

/// Solar elevation and azimuth from Spencer's series.
pub fn spencer_position(lat_deg: f64, lon_deg: f64, utc: DateTime<Utc>) -> SolarPosition {
    let day_of_year = utc.ordinal() as f64;
    let hour = decimal_hour(&utc);

    // Fractional year
    let gamma = (2.0 * PI / 365.0) * (day_of_year - 1.0 + (hour - 12.0) / 24.0);
    let (sin1, cos1) = gamma.sin_cos();
    let (sin2, cos2) = (2.0 * gamma).sin_cos();
    let (sin3, cos3) = (3.0 * gamma).sin_cos();

    let eqtime = 229.18
        * (0.000075 + 0.001868 * cos1 - 0.032077 * sin1 - 0.014615 * cos2 - 0.040849 * sin2);
    let decl = 0.006918 - 0.399912 * cos1 + 0.070257 * sin1 - 0.006758 * cos2 + 0.000907 * sin2
        - 0.002697 * cos3
        + 0.00148 * sin3;

    let true_solar_time = hour * 60.0 + eqtime + 4.0 * lon_deg;
    let hour_angle = (true_solar_time / 4.0 - 180.0).to_radians();

    let lat = lat_deg.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_decl, cos_decl) = decl.sin_cos();
    let (sin_ha, cos_ha) = hour_angle.sin_cos();

    let sin_elev = (sin_lat * sin_decl + cos_lat * cos_decl * cos_ha).clamp(-1.0, 1.0);
    let elevation = sin_elev.asin();

    let x = -cos_ha * sin_lat * cos_decl + sin_decl * cos_lat;
    let y = -sin_ha * cos_decl;
    let azimuth = normalize_azimuth(y.atan2(x));

    SolarPosition {
        elevation_rad: elevation,
        azimuth_rad: azimuth,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpencerModel;

impl SunPositionModel for SpencerModel {
    fn name(&self) -> &'static str {
        "spencer"
    }

    fn position(&self, lat_deg: f64, lon_deg: f64, utc: DateTime<Utc>) -> Result<SolarPosition> {
        Ok(spencer_position(lat_deg, lon_deg, utc))
    }
}

/// Almanac-style ephemeris built on the sun's mean longitude and mean
/// anomaly, counted in days from 2000-01-01.
///
/// Tracks the year-to-year drift of the equinox that the Spencer series
/// ignores. The leap-year count is only exact for 2000..=2099.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlmanacModel;

impl AlmanacModel {
    const FIRST_YEAR: i32 = 2000;
    const LAST_YEAR: i32 = 2099;
}

impl SunPositionModel for AlmanacModel {
    fn name(&self) -> &'static str {
        "almanac"
    }

    fn position(&self, lat_deg: f64, lon_deg: f64, utc: DateTime<Utc>) -> Result<SolarPosition> {
        if !(lat_deg.is_finite() && lon_deg.is_finite())
            || lat_deg.abs() > 90.0
            || lon_deg.abs() > 180.0
        {
            return Err(ShadeError::InvalidCoordinates {
                lat: lat_deg,
                lon: lon_deg,
            });
        }
        let year = utc.year();
        if !(Self::FIRST_YEAR..=Self::LAST_YEAR).contains(&year) {
            return Err(ShadeError::UnsupportedDate {
                model: self.name(),
                year,
            });
        }

        let hour = decimal_hour(&utc);
        let leap_days = ((year - 2000) / 4 + 1) as f64;
        let n = leap_days + (year - 2000) as f64 * 365.0 + utc.ordinal0() as f64 + hour / 24.0
            - 1.5;

        let mean_longitude = (280.466 + 0.9856474 * n).rem_euclid(360.0);
        let mean_anomaly = (357.528 + 0.9856003 * n).rem_euclid(360.0).to_radians();
        let (sin_lambda, cos_lambda) = (mean_longitude
            + 1.915 * mean_anomaly.sin()
            + 0.020 * (2.0 * mean_anomaly).sin())
        .rem_euclid(360.0)
        .to_radians()
        .sin_cos();
        let (sin_eps, cos_eps) = (23.440 - 0.0000004 * n).to_radians().sin_cos();

        let right_ascension = (cos_eps * sin_lambda)
            .atan2(cos_lambda)
            .to_degrees()
            .rem_euclid(360.0);
        let declination = (sin_eps * sin_lambda).asin();
        let (sin_decl, cos_decl) = declination.sin_cos();

        let eot = (mean_longitude - right_ascension + 180.0).rem_euclid(360.0) - 180.0;
        let subsolar_lon = -15.0 * (hour - 12.0 + eot / 15.0);

        let (sin_dl, cos_dl) = (subsolar_lon - lon_deg).to_radians().sin_cos();
        let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();

        let sx = cos_decl * sin_dl;
        let sy = cos_lat * sin_decl - sin_lat * cos_decl * cos_dl;
        let sz = (sin_lat * sin_decl + cos_lat * cos_decl * cos_dl).clamp(-1.0, 1.0);

        Ok(SolarPosition::from_components(
            sz.asin(),
            (-sx).atan2(-sy) + PI,
        ))
    }
}

/// Uses `preferred` and falls back to `fallback` whenever it fails.
pub struct FallbackModel<P, F> {
    preferred: P,
    fallback: F,
    warned: AtomicBool,
}

impl<P: SunPositionModel, F: SunPositionModel> FallbackModel<P, F> {
    pub fn new(preferred: P, fallback: F) -> Self {
        Self {
            preferred,
            fallback,
            warned: AtomicBool::new(false),
        }
    }
}

impl<P: SunPositionModel> FallbackModel<P, SpencerModel> {
    pub fn with_spencer(preferred: P) -> Self {
        Self::new(preferred, SpencerModel)
    }
}

impl<P: SunPositionModel, F: SunPositionModel> SunPositionModel for FallbackModel<P, F> {
    fn name(&self) -> &'static str {
        self.preferred.name()
    }

    fn position(&self, lat_deg: f64, lon_deg: f64, utc: DateTime<Utc>) -> Result<SolarPosition> {
        match self.preferred.position(lat_deg, lon_deg, utc) {
            Ok(pos) => Ok(pos),
            Err(e) => {
                // Warn once per model, not once per trail point
                if !self.warned.swap(true, Ordering::Relaxed) {
                    warn!(
                        "{} solar model failed ({}), falling back to {}",
                        self.preferred.name(),
                        e,
                        self.fallback.name()
                    );
                }
                self.fallback.position(lat_deg, lon_deg, utc)
            }
        }
    }
}

#[cfg(feature = "python")]
#[pyfunction]
/// Solar (elevation, azimuth) in radians for a UNIX timestamp in seconds.
pub fn sun_position(lat_deg: f64, lon_deg: f64, unix_seconds: i64) -> PyResult<(f64, f64)> {
    let utc = DateTime::<Utc>::from_timestamp(unix_seconds, 0).ok_or_else(|| {
        pyo3::exceptions::PyValueError::new_err(format!(
            "timestamp {} is out of range",
            unix_seconds
        ))
    })?;
    let pos = spencer_position(lat_deg, lon_deg, utc);
    Ok((pos.elevation_rad, pos.azimuth_rad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn test_spencer_summer_noon() {
        let pos = spencer_position(45.0, 5.0, utc(2024, 6, 21, 12, 0, 0));
        assert_abs_diff_eq!(pos.elevation_rad, 1.189093446523571, epsilon = 1e-9);
        assert_abs_diff_eq!(pos.azimuth_rad, 3.340982309447105, epsilon = 1e-9);
    }

    #[test]
    fn test_spencer_winter_midnight_is_night() {
        let pos = spencer_position(45.0, 5.0, utc(2024, 12, 21, 0, 0, 0));
        assert_abs_diff_eq!(pos.elevation_rad, -1.1862266350461597, epsilon = 1e-9);
        assert_abs_diff_eq!(pos.azimuth_rad, 0.23594868544641076, epsilon = 1e-9);
        assert!(!pos.is_daytime());
    }

    #[test]
    fn test_spencer_with_seconds() {
        let pos = spencer_position(45.9237, 6.8694, utc(2025, 7, 14, 8, 30, 15));
        assert_abs_diff_eq!(pos.elevation_rad, 0.7863243981910177, epsilon = 1e-9);
        assert_abs_diff_eq!(pos.azimuth_rad, 1.8523252026366663, epsilon = 1e-9);
    }

    #[test]
    fn test_spencer_southern_hemisphere_faces_north() {
        let pos = spencer_position(-33.9, 18.4, utc(2024, 3, 20, 10, 0, 0));
        assert_abs_diff_eq!(pos.elevation_rad, 0.9404093573647063, epsilon = 1e-9);
        assert_abs_diff_eq!(pos.azimuth_rad, 0.4094180418166076, epsilon = 1e-9);
    }

    #[test]
    fn test_spencer_at_pole_stays_finite() {
        let pos = spencer_position(90.0, 0.0, utc(2024, 6, 21, 12, 0, 0));
        assert!(pos.elevation_rad.is_finite());
        assert!((0.0..TAU).contains(&pos.azimuth_rad));
    }

    #[test]
    fn test_almanac_close_to_spencer() {
        let cases = [
            (45.0, 5.0, utc(2024, 6, 21, 12, 0, 0)),
            (45.9237, 6.8694, utc(2025, 7, 14, 8, 30, 15)),
            (-33.9, 18.4, utc(2024, 3, 20, 10, 0, 0)),
        ];
        for (lat, lon, t) in cases {
            let a = AlmanacModel.position(lat, lon, t).unwrap();
            let s = SpencerModel.position(lat, lon, t).unwrap();
            assert_abs_diff_eq!(a.elevation_rad, s.elevation_rad, epsilon = 0.01);
            assert_abs_diff_eq!(a.azimuth_rad, s.azimuth_rad, epsilon = 0.01);
        }
        let a = AlmanacModel.position(45.0, 5.0, utc(2024, 6, 21, 12, 0, 0)).unwrap();
        assert_abs_diff_eq!(a.elevation_rad, 1.1889702310665442, epsilon = 1e-9);
        assert_abs_diff_eq!(a.azimuth_rad, 3.336773212079082, epsilon = 1e-9);
    }

    #[test]
    fn test_almanac_rejects_out_of_range() {
        assert!(matches!(
            AlmanacModel.position(45.0, 5.0, utc(2150, 1, 1, 0, 0, 0)),
            Err(ShadeError::UnsupportedDate { year: 2150, .. })
        ));
        assert!(matches!(
            AlmanacModel.position(95.0, 5.0, utc(2024, 1, 1, 0, 0, 0)),
            Err(ShadeError::InvalidCoordinates { .. })
        ));
    }

    #[test]
    fn test_fallback_used_on_failure() {
        let model = FallbackModel::with_spencer(AlmanacModel);
        let t = utc(2150, 6, 21, 12, 0, 0);
        let pos = model.position(45.0, 5.0, t).unwrap();
        assert_eq!(pos, spencer_position(45.0, 5.0, t));

        let t = utc(2024, 6, 21, 12, 0, 0);
        let pos = model.position(45.0, 5.0, t).unwrap();
        assert_eq!(pos, AlmanacModel.position(45.0, 5.0, t).unwrap());
    }

    #[test]
    fn test_normalize_azimuth() {
        assert_abs_diff_eq!(normalize_azimuth(-FRAC_PI_2), 1.5 * PI, epsilon = 1e-12);
        assert_eq!(normalize_azimuth(TAU), 0.0);
        assert_eq!(normalize_azimuth(-1e-18), 0.0);
    }
}

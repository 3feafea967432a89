//! Trail points and the timing invariants tying them to the sun.
//!
//! A point's solar position is always derived from its timestamp; every
//! operation that moves a timestamp recomputes it. Offset points (left and
//! right of the path) never compute their own and instead mirror the
//! center point sharing their sequence index.

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};

use crate::config::BREAK_SNAP_DISTANCE_M;
use crate::error::{Result, ShadeError};
use crate::raster::Extent;
use crate::sun::{SolarPosition, SunPositionModel};

/// Projected (m) and geographic (degrees) coordinates of one location.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoPoint {
    pub x: f64,
    pub y: f64,
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(x: f64, y: f64, lat: f64, lon: f64) -> Self {
        Self { x, y, lat, lon }
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrailCategory {
    Center,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrailPoint {
    location: GeoPoint,
    z: f64,
    time: DateTime<Utc>,
    solar: SolarPosition,
    index: usize,
    category: TrailCategory,
    grid_convergence_rad: f64,
}

impl TrailPoint {
    /// A center point with its solar position computed by `model`.
    pub fn new<M: SunPositionModel + ?Sized>(
        location: GeoPoint,
        z: f64,
        time: DateTime<Utc>,
        model: &M,
    ) -> Result<Self> {
        let solar = model.position(location.lat, location.lon, time)?;
        Ok(Self::with_solar(location, z, time, solar))
    }

    /// A center point whose solar position was computed elsewhere.
    pub fn with_solar(
        location: GeoPoint,
        z: f64,
        time: DateTime<Utc>,
        solar: SolarPosition,
    ) -> Self {
        Self {
            location,
            z,
            time,
            solar,
            index: 0,
            category: TrailCategory::Center,
            grid_convergence_rad: 0.0,
        }
    }

    /// A left/right point sharing `center`'s time, sun and sequence index.
    pub fn offset_from(center: &TrailPoint, location: GeoPoint, category: TrailCategory) -> Self {
        Self {
            location,
            category,
            ..center.clone()
        }
    }

    /// Angle from grid north to true north at this point. Scans run along
    /// `solar azimuth - convergence` in raster space.
    pub fn with_grid_convergence(mut self, convergence_rad: f64) -> Self {
        self.grid_convergence_rad = convergence_rad;
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn with_elevation(mut self, z: f64) -> Self {
        self.z = z;
        self
    }

    /// Same point at another time, with a fresh solar position.
    pub fn retimed<M: SunPositionModel + ?Sized>(
        &self,
        time: DateTime<Utc>,
        model: &M,
    ) -> Result<Self> {
        let solar = model.position(self.location.lat, self.location.lon, time)?;
        Ok(Self {
            time,
            solar,
            ..self.clone()
        })
    }

    pub fn location(&self) -> &GeoPoint {
        &self.location
    }

    pub fn x(&self) -> f64 {
        self.location.x
    }

    pub fn y(&self) -> f64 {
        self.location.y
    }

    pub fn z(&self) -> f64 {
        self.z
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn solar(&self) -> &SolarPosition {
        &self.solar
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn category(&self) -> TrailCategory {
        self.category
    }

    pub fn grid_convergence_rad(&self) -> f64 {
        self.grid_convergence_rad
    }
}

/// A hiking path: densified center points plus optional offset trails.
#[derive(Debug, Clone, Default)]
pub struct Trail {
    center: Vec<TrailPoint>,
    left: Vec<TrailPoint>,
    right: Vec<TrailPoint>,
    /// Stops as (center index, duration), in insertion order.
    breaks: Vec<(usize, Duration)>,
}

fn check_monotonic<'a, I: IntoIterator<Item = &'a DateTime<Utc>>>(times: I) -> Result<()> {
    let mut prev: Option<&DateTime<Utc>> = None;
    for (index, t) in times.into_iter().enumerate() {
        if prev.is_some_and(|p| t < p) {
            return Err(ShadeError::NonMonotonicTimes { index });
        }
        prev = Some(t);
    }
    Ok(())
}

impl Trail {
    /// Takes ownership of the center points, numbering them in order.
    pub fn from_center_points(points: Vec<TrailPoint>) -> Result<Self> {
        check_monotonic(points.iter().map(|p| &p.time))?;
        let center = points
            .into_iter()
            .enumerate()
            .map(|(i, p)| TrailPoint {
                index: i,
                category: TrailCategory::Center,
                ..p
            })
            .collect();
        Ok(Self {
            center,
            left: Vec::new(),
            right: Vec::new(),
            breaks: Vec::new(),
        })
    }

    /// Adds trails `distance_m` to the left and right of the path.
    ///
    /// `to_geographic` maps projected (x, y) to (lat, lon); points it cannot
    /// convert are dropped. A single-point trail has no direction and gets
    /// no offsets.
    pub fn with_offset_trails<F>(mut self, distance_m: f64, to_geographic: F) -> Self
    where
        F: Fn(f64, f64) -> Option<(f64, f64)>,
    {
        self.left.clear();
        self.right.clear();
        let n = self.center.len();
        if n < 2 {
            return self;
        }

        for (i, current) in self.center.iter().enumerate() {
            let (p1, p2) = if i + 1 < n {
                (current, &self.center[i + 1])
            } else {
                (&self.center[i - 1], current)
            };
            let dx = p2.x() - p1.x();
            let dy = p2.y() - p1.y();
            let length = dx.hypot(dy);
            let (ux, uy) = if length == 0.0 {
                (0.0, 0.0)
            } else {
                (dx / length, dy / length)
            };

            let sides = [
                (TrailCategory::Left, -uy, ux),
                (TrailCategory::Right, uy, -ux),
            ];
            for (category, nx, ny) in sides {
                let x = current.x() + distance_m * nx;
                let y = current.y() + distance_m * ny;
                let Some((lat, lon)) = to_geographic(x, y) else {
                    continue;
                };
                let point =
                    TrailPoint::offset_from(current, GeoPoint::new(x, y, lat, lon), category);
                match category {
                    TrailCategory::Left => self.left.push(point),
                    _ => self.right.push(point),
                }
            }
        }
        self
    }

    pub fn center(&self) -> &[TrailPoint] {
        &self.center
    }

    pub fn left(&self) -> &[TrailPoint] {
        &self.left
    }

    pub fn right(&self) -> &[TrailPoint] {
        &self.right
    }

    pub fn len(&self) -> usize {
        self.center.len() + self.left.len() + self.right.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Center points first, then the left trail, then the right trail.
    pub fn points(&self) -> impl Iterator<Item = &TrailPoint> {
        self.center
            .iter()
            .chain(self.left.iter())
            .chain(self.right.iter())
    }

    pub fn to_points(&self) -> Vec<TrailPoint> {
        self.points().cloned().collect()
    }

    /// Sets every point's ground height; unsampled points fall back to 0 m.
    pub fn sample_elevation<F>(&mut self, sampler: F)
    where
        F: Fn(f64, f64) -> Option<f64>,
    {
        for p in self
            .center
            .iter_mut()
            .chain(self.left.iter_mut())
            .chain(self.right.iter_mut())
        {
            p.z = sampler(p.x(), p.y()).unwrap_or(0.0);
        }
    }

    /// Shifts the trail from the center point nearest to `(x, y)` onwards
    /// by `duration`, e.g. for a picnic stop.
    ///
    /// Locations farther than [`BREAK_SNAP_DISTANCE_M`] from every point are
    /// ignored. Returns the index the break was applied at.
    pub fn insert_break<M: SunPositionModel + ?Sized>(
        &mut self,
        x: f64,
        y: f64,
        duration: Duration,
        model: &M,
    ) -> Result<Option<usize>> {
        let Some((index, distance)) = self
            .center
            .iter()
            .map(|p| (p.index, p.location.distance_to(x, y)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
        else {
            return Ok(None);
        };

        if distance >= BREAK_SNAP_DISTANCE_M {
            warn!(
                "break location is {:.1} m from the trail, ignoring it",
                distance
            );
            return Ok(None);
        }
        if duration < Duration::zero() {
            return Err(ShadeError::NonMonotonicTimes { index });
        }

        debug!(
            "inserting {} min break at point {} ({:.1} m away)",
            duration.num_minutes(),
            index,
            distance
        );
        for p in &mut self.center[index..] {
            *p = p.retimed(p.time + duration, model)?;
        }
        self.breaks.push((index, duration));
        self.sync_offsets();
        Ok(Some(index))
    }

    /// Stops recorded by [`insert_break`](Self::insert_break).
    pub fn breaks(&self) -> &[(usize, Duration)] {
        &self.breaks
    }

    /// Total stop time taken before reaching center point `index`.
    fn break_offset(&self, index: usize) -> Duration {
        self.breaks
            .iter()
            .filter(|(at, _)| *at <= index)
            .fold(Duration::zero(), |acc, (_, d)| acc + *d)
    }

    /// Replaces the center timestamps, e.g. after slope-aware timing.
    ///
    /// `times` are walking times only: every recorded break is added back
    /// to the points at and after its index.
    pub fn retime<M: SunPositionModel + ?Sized>(
        &mut self,
        times: &[DateTime<Utc>],
        model: &M,
    ) -> Result<()> {
        if times.len() != self.center.len() {
            return Err(ShadeError::LengthMismatch {
                what: "trail timestamps",
                expected: self.center.len(),
                actual: times.len(),
            });
        }
        check_monotonic(times)?;

        let retimed = self
            .center
            .iter()
            .zip(times)
            .map(|(p, &t)| {
                let t = t + self.break_offset(p.index);
                if p.time == t {
                    Ok(p.clone())
                } else {
                    p.retimed(t, model)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        self.center = retimed;
        self.sync_offsets();
        Ok(())
    }

    fn sync_offsets(&mut self) {
        let center = &self.center;
        for p in self.left.iter_mut().chain(self.right.iter_mut()) {
            if let Some(c) = center.get(p.index) {
                p.time = c.time;
                p.solar = c.solar;
            }
        }
    }

    /// Bounding box of all points grown by `margin` meters.
    pub fn extent(&self, margin: f64) -> Option<Extent> {
        Extent::from_points(self.points().map(|p| (p.x(), p.y()))).map(|e| e.grow(margin))
    }

    /// Latitude at the middle of the center points' latitude range.
    pub fn center_lat(&self) -> Option<f64> {
        let (lo, hi) = self
            .center
            .iter()
            .map(|p| p.location.lat)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), lat| {
                (lo.min(lat), hi.max(lat))
            });
        (lo <= hi).then(|| (lo + hi) / 2.0)
    }
}

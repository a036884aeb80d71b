//! Conversion from geographic coordinates into the vehicle-centred frame.
//!
//! Points are projected with UTM in the vehicle's zone, translated so the
//! vehicle sits at the origin and rotated by the heading. The projection is
//! only trusted within a few hundred meters of the vehicle.

use geo::{Coord, LineString, Point};
use serde::{Deserialize, Serialize};

const K0: f64 = 0.9996;
const E: f64 = 0.00669438;
const E2: f64 = E * E;
const E3: f64 = E2 * E;
const E_P2: f64 = E / (1.0 - E);
const M1: f64 = 1.0 - E / 4.0 - 3.0 * E2 / 64.0 - 5.0 * E3 / 256.0;
const M2: f64 = 3.0 * E / 8.0 + 3.0 * E2 / 32.0 + 45.0 * E3 / 1024.0;
const M3: f64 = 15.0 * E2 / 256.0 + 45.0 * E3 / 1024.0;
const M4: f64 = 35.0 * E3 / 3072.0;
const EARTH_RADIUS: f64 = 6_378_137.0;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Vehicle position and heading at prediction time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehiclePose {
    pub lat: f64,
    pub lon: f64,
    /// Degrees
    pub heading: f64,
}

impl VehiclePose {
    pub fn new(lat: f64, lon: f64, heading: f64) -> Self {
        Self { lat, lon, heading }
    }

    pub fn position(&self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

pub fn utm_zone(lat: f64, lon: f64) -> u8 {
    if (56.0..64.0).contains(&lat) && (3.0..12.0).contains(&lon) {
        return 32;
    }
    if (72.0..=84.0).contains(&lat) && lon >= 0.0 {
        if lon < 9.0 {
            return 31;
        } else if lon < 21.0 {
            return 33;
        } else if lon < 33.0 {
            return 35;
        } else if lon < 42.0 {
            return 37;
        }
    }
    (((lon + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60) as u8
}

/// Forward UTM projection into a fixed zone. Returns (easting, northing).
pub fn project_utm(lat: f64, lon: f64, zone: u8, southern: bool) -> (f64, f64) {
    let lat_rad = lat.to_radians();
    let lat_sin = lat_rad.sin();
    let lat_cos = lat_rad.cos();
    let lat_tan = lat_sin / lat_cos;
    let lat_tan2 = lat_tan * lat_tan;
    let lat_tan4 = lat_tan2 * lat_tan2;

    let central_lon = (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0;
    let mut dlon = (lon - central_lon).to_radians();
    // keep the longitude difference in (-pi, pi]
    dlon = (dlon + std::f64::consts::PI).rem_euclid(2.0 * std::f64::consts::PI)
        - std::f64::consts::PI;

    let n = EARTH_RADIUS / (1.0 - E * lat_sin * lat_sin).sqrt();
    let c = E_P2 * lat_cos * lat_cos;

    let a = lat_cos * dlon;
    let a2 = a * a;
    let a3 = a2 * a;
    let a4 = a3 * a;
    let a5 = a4 * a;
    let a6 = a5 * a;

    let m = EARTH_RADIUS
        * (M1 * lat_rad - M2 * (2.0 * lat_rad).sin() + M3 * (4.0 * lat_rad).sin()
            - M4 * (6.0 * lat_rad).sin());

    let easting = K0
        * n
        * (a + a3 / 6.0 * (1.0 - lat_tan2 + c)
            + a5 / 120.0 * (5.0 - 18.0 * lat_tan2 + lat_tan4 + 72.0 * c - 58.0 * E_P2))
        + FALSE_EASTING;

    let mut northing = K0
        * (m + n
            * lat_tan
            * (a2 / 2.0
                + a4 / 24.0 * (5.0 - lat_tan2 + 9.0 * c + 4.0 * c * c)
                + a6 / 720.0 * (61.0 - 58.0 * lat_tan2 + lat_tan4 + 600.0 * c - 330.0 * E_P2)));
    if southern {
        northing += FALSE_NORTHING_SOUTH;
    }

    (easting, northing)
}

/// Vehicle-centred planar frame: origin at the vehicle, rotated by its heading.
#[derive(Debug, Clone, Copy)]
pub struct LocalFrame {
    zone: u8,
    southern: bool,
    origin: Coord<f64>,
    cos_heading: f64,
    sin_heading: f64,
}

impl LocalFrame {
    pub fn new(pose: &VehiclePose) -> Self {
        let zone = utm_zone(pose.lat, pose.lon);
        let southern = pose.lat < 0.0;
        let (x, y) = project_utm(pose.lat, pose.lon, zone, southern);
        let heading = pose.heading.to_radians();
        Self {
            zone,
            southern,
            origin: Coord { x, y },
            cos_heading: heading.cos(),
            sin_heading: heading.sin(),
        }
    }

    pub fn zone(&self) -> u8 {
        self.zone
    }

    /// Converts one geographic position into the local frame.
    pub fn to_local(&self, lat: f64, lon: f64) -> Coord<f64> {
        let (easting, northing) = project_utm(lat, lon, self.zone, self.southern);
        let px = easting - self.origin.x;
        let py = northing - self.origin.y;
        Coord {
            x: self.cos_heading * px - self.sin_heading * py,
            y: self.sin_heading * px + self.cos_heading * py,
        }
    }

    /// Converts a geographic point stored as (x = lon, y = lat).
    pub fn point_to_local(&self, point: &Point<f64>) -> Coord<f64> {
        self.to_local(point.y(), point.x())
    }

    /// Converts a geographic polyline stored as (x = lon, y = lat).
    pub fn line_to_local(&self, line: &LineString<f64>) -> LineString<f64> {
        line.0
            .iter()
            .map(|c| self.to_local(c.y, c.x))
            .collect::<Vec<_>>()
            .into()
    }
}

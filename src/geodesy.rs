//! Great-circle helpers and the local planar projection used for the watch map.
//!
//! The projection is azimuthal: the offset is the great-circle distance from the reference
//! point laid out along the initial bearing. It is only accurate within a few kilometers of the
//! reference, which is what `projection_radius_m` bounds.

use geo::{HaversineBearing, HaversineDistance, Point};

use crate::types::GeoPoint;

fn to_point(p: &GeoPoint) -> Point<f64> {
    Point::new(p.longitude, p.latitude)
}

/// Haversine distance in meters
pub fn great_circle_distance(from: &GeoPoint, to: &GeoPoint) -> f64 {
    to_point(from).haversine_distance(&to_point(to))
}

/// Initial bearing from `from` to `to`, degrees clockwise from north in [0, 360)
pub fn bearing(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let deg = to_point(from).haversine_bearing(to_point(to));
    (deg + 360.0) % 360.0
}

/// Unfloored planar offset in meters (east, north)
pub fn planar_offset_m(reference: &GeoPoint, current: &GeoPoint) -> (f64, f64) {
    let distance = great_circle_distance(reference, current);
    if distance == 0.0 {
        return (0.0, 0.0);
    }
    let theta = bearing(reference, current).to_radians();
    (distance * theta.sin(), distance * theta.cos())
}

#[derive(Clone, Debug)]
pub struct CoordinateProjector {
    unit_divisor: f64,
    validity_radius_m: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Projection {
    pub x: i32,
    pub y: i32,
    /// Current point lies outside the radius where the approximation holds
    pub beyond_radius: bool,
}

impl CoordinateProjector {
    pub fn new(unit_divisor: f64, validity_radius_m: f64) -> Self {
        Self {
            unit_divisor,
            validity_radius_m,
        }
    }

    pub fn project(&self, reference: &GeoPoint, current: &GeoPoint) -> Projection {
        let (east, north) = planar_offset_m(reference, current);
        let range = (east * east + north * north).sqrt();
        Projection {
            x: (east / self.unit_divisor).floor() as i32,
            y: (north / self.unit_divisor).floor() as i32,
            beyond_radius: range > self.validity_radius_m,
        }
    }
}

//! Great-circle distance on a spherical Earth

use crate::domain::types::Coordinate;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in meters using the mean Earth radius
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    distance_meters_with_radius(a, b, EARTH_RADIUS_M)
}

/// Haversine distance in meters on a sphere of the given radius.
///
/// Inputs are degrees. The result is non-negative, symmetric in `a`/`b`
/// and exactly zero for identical coordinates.
pub fn distance_meters_with_radius(a: Coordinate, b: Coordinate, radius_m: f64) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let half_chord = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push antipodal inputs a hair above 1
    let half_chord = half_chord.clamp(0.0, 1.0);

    let angle = 2.0 * half_chord.sqrt().atan2((1.0 - half_chord).sqrt());
    radius_m * angle
}

//! Resolution and bit-count math.
//!
//! A geohash of `b` bits describes a cell whose size depends on how many of
//! those bits went to latitude versus longitude, and, for longitude, on how
//! far from the equator the cell lies. These helpers answer the reverse
//! question: how many bits can a query afford so that a cell is still at
//! least as large as a given radius.

use geoq_types::{GeoPoint, ValidationError, BITS_PER_CHAR, MAX_PRECISION};

use crate::distance::radians;
use crate::HashResult;

/// Length of a full meridian (pole to pole and back), in meters.
pub const EARTH_MERIDIONAL_CIRCUMFERENCE: f64 = 40_007_860.0;

/// Length of one degree of latitude, in meters.
pub const METERS_PER_DEGREE_LATITUDE: f64 = 110_574.0;

/// WGS-84 equatorial radius, in meters.
pub const EARTH_EQUATORIAL_RADIUS: f64 = 6_378_137.0;

/// WGS-84 first eccentricity squared.
pub const EARTH_ECCENTRICITY_SQUARED: f64 = 0.006_694_478_197_99;

/// Degree lengths below this are treated as collapsed (the poles).
const EPSILON: f64 = 1e-12;

/// Largest bit count any geohash can carry.
pub const MAX_BITS_PRECISION: u32 = (MAX_PRECISION * BITS_PER_CHAR) as u32;

/// Convert a distance along a parallel into degrees of longitude at the
/// given latitude. Saturates at 360.
pub fn meters_to_longitude_degrees(distance: f64, latitude: f64) -> f64 {
    let lat = radians(latitude);
    let num = lat.cos() * EARTH_EQUATORIAL_RADIUS * std::f64::consts::PI / 180.0;
    let denom = 1.0 / (1.0 - EARTH_ECCENTRICITY_SQUARED * lat.sin() * lat.sin()).sqrt();
    let delta_deg = num * denom;
    if delta_deg < EPSILON {
        if distance > 0.0 {
            360.0
        } else {
            0.0
        }
    } else {
        (distance / delta_deg).min(360.0)
    }
}

/// Fractional number of longitude bits whose cell width is at least
/// `resolution` meters at `latitude`, within `[1, MAX_BITS_PRECISION]`.
///
/// A span that saturates at 360 degrees (the poles) yields 1; a zero span
/// (zero resolution) yields the maximum.
pub fn longitude_bits_for_resolution(resolution: f64, latitude: f64) -> f64 {
    let degrees = meters_to_longitude_degrees(resolution, latitude);
    if degrees > 0.0 {
        (360.0 / degrees)
            .log2()
            .clamp(1.0, MAX_BITS_PRECISION as f64)
    } else {
        MAX_BITS_PRECISION as f64
    }
}

/// Fractional number of latitude bits whose cell height is at least
/// `resolution` meters, capped at [`MAX_BITS_PRECISION`].
pub fn latitude_bits_for_resolution(resolution: f64) -> f64 {
    (EARTH_MERIDIONAL_CIRCUMFERENCE / 2.0 / resolution)
        .log2()
        .min(MAX_BITS_PRECISION as f64)
}

/// Fold any longitude into `[-180, 180]`.
pub fn wrap_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        return longitude;
    }
    let adjusted = longitude + 180.0;
    if adjusted > 0.0 {
        (adjusted % 360.0) - 180.0
    } else {
        180.0 - (-adjusted % 360.0)
    }
}

pub(crate) fn validate_radius(radius: f64) -> HashResult<()> {
    if !radius.is_finite() || radius < 0.0 {
        return Err(ValidationError::InvalidArgument(format!(
            "radius must be a finite, non-negative number of meters, got {radius}"
        )));
    }
    Ok(())
}

/// Latitudes of the southern and northern box edges, clamped to the poles.
fn box_edges(center: &GeoPoint, radius: f64) -> (f64, f64) {
    let delta = radius / METERS_PER_DEGREE_LATITUDE;
    (
        (center.latitude() - delta).max(-90.0),
        (center.latitude() + delta).min(90.0),
    )
}

/// Number of geohash bits a query of `radius` meters around `center` can
/// use while every cell stays at least as large as the radius.
///
/// Latitude and longitude bits interleave (longitude first), so `2n` bits
/// carry `n` latitude bits and `2n - 1` bits carry `n` longitude bits. The
/// longitude budget is evaluated at both box edges because cells narrow
/// toward the poles. Close to a pole the longitude span degenerates and the
/// result is 1.
pub fn bounding_box_bits(center: &GeoPoint, radius: f64) -> HashResult<u32> {
    center.validate()?;
    validate_radius(radius)?;

    let (south, north) = box_edges(center, radius);
    let bits_lat = latitude_bits_for_resolution(radius).floor() * 2.0;
    let bits_lon_north = longitude_bits_for_resolution(radius, north).floor() * 2.0 - 1.0;
    let bits_lon_south = longitude_bits_for_resolution(radius, south).floor() * 2.0 - 1.0;

    let bits = bits_lat
        .min(bits_lon_north)
        .min(bits_lon_south)
        .min(MAX_BITS_PRECISION as f64);
    Ok(bits.max(1.0) as u32)
}

/// The center and its 8 neighbours on the query's bounding box: north and
/// south edges at `radius` meters of latitude, east and west edges at the
/// wider of the two edge longitude spans.
pub fn bounding_box_coordinates(center: &GeoPoint, radius: f64) -> HashResult<[GeoPoint; 9]> {
    center.validate()?;
    validate_radius(radius)?;

    let (south, north) = box_edges(center, radius);
    let lon_delta =
        meters_to_longitude_degrees(radius, north).max(meters_to_longitude_degrees(radius, south));
    let lat = center.latitude();
    let lon = center.longitude();
    let west = wrap_longitude(lon - lon_delta);
    let east = wrap_longitude(lon + lon_delta);

    Ok([
        GeoPoint::new(lat, lon)?,
        GeoPoint::new(lat, west)?,
        GeoPoint::new(lat, east)?,
        GeoPoint::new(north, lon)?,
        GeoPoint::new(north, west)?,
        GeoPoint::new(north, east)?,
        GeoPoint::new(south, lon)?,
        GeoPoint::new(south, west)?,
        GeoPoint::new(south, east)?,
    ])
}

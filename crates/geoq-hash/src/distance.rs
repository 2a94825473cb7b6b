//! Great-circle distance.

use std::f64::consts::PI;

use geoq_types::{GeoPoint, ValidationError};

use crate::bits::validate_radius;
use crate::HashResult;

/// Mean Earth radius, in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

pub(crate) fn radians(degrees: f64) -> f64 {
    degrees * PI / 180.0
}

/// Convert degrees to radians, rejecting non-finite input.
pub fn degrees_to_radians(degrees: f64) -> HashResult<f64> {
    if !degrees.is_finite() {
        return Err(ValidationError::InvalidArgument(format!(
            "expected a finite number of degrees, got {degrees}"
        )));
    }
    Ok(radians(degrees))
}

/// Haversine distance between two points, in kilometers.
pub fn calculate_distance(a: &GeoPoint, b: &GeoPoint) -> HashResult<f64> {
    a.validate()?;
    b.validate()?;

    let lat_delta = degrees_to_radians(b.latitude() - a.latitude())?;
    let lon_delta = degrees_to_radians(b.longitude() - a.longitude())?;
    let h = (lat_delta / 2.0).sin().powi(2)
        + (lon_delta / 2.0).sin().powi(2)
            * degrees_to_radians(a.latitude())?.cos()
            * degrees_to_radians(b.latitude())?.cos();
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    Ok(EARTH_RADIUS_KM * c)
}

/// Returns `true` if `location` lies within `radius` meters of `center`,
/// boundary included.
pub fn is_within_radius(center: &GeoPoint, location: &GeoPoint, radius: f64) -> HashResult<bool> {
    validate_radius(radius)?;
    Ok(calculate_distance(center, location)? <= radius / 1000.0)
}

//! Point to geohash encoding.

use geoq_types::{GeoPoint, Geohash, ValidationError, BASE32, BITS_PER_CHAR, MAX_PRECISION};

use crate::HashResult;

/// Precision used for stored documents unless configured otherwise.
pub const DEFAULT_PRECISION: usize = 10;

/// Check that `precision` is a supported geohash length.
pub fn validate_precision(precision: usize) -> HashResult<()> {
    if !(1..=MAX_PRECISION).contains(&precision) {
        return Err(ValidationError::InvalidArgument(format!(
            "precision must be within [1, {MAX_PRECISION}], got {precision}"
        )));
    }
    Ok(())
}

/// Encode a point as a geohash of `precision` symbols.
///
/// Bits alternate between longitude and latitude, longitude first. Each bit
/// halves the remaining interval; a coordinate strictly above the midpoint
/// selects the upper half. Every 5 bits become one [`BASE32`] symbol.
pub fn encode(point: &GeoPoint, precision: usize) -> HashResult<Geohash> {
    validate_precision(precision)?;
    point.validate()?;

    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut symbol = 0usize;
    let mut bits = 0usize;
    let mut even = true;

    while hash.len() < precision {
        let (value, range) = if even {
            (point.longitude(), &mut lon_range)
        } else {
            (point.latitude(), &mut lat_range)
        };
        let mid = (range.0 + range.1) / 2.0;
        if value > mid {
            symbol = (symbol << 1) + 1;
            range.0 = mid;
        } else {
            symbol <<= 1;
            range.1 = mid;
        }
        even = !even;

        bits += 1;
        if bits == BITS_PER_CHAR {
            hash.push(BASE32[symbol] as char);
            bits = 0;
            symbol = 0;
        }
    }

    Ok(Geohash::from_encoded(hash))
}

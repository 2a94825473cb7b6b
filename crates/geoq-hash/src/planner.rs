//! Circle to covering range set.
//!
//! A query circle is turned into a sorted list of disjoint half-open key
//! ranges such that every stored geohash whose point lies inside the circle
//! falls in one of them. Ranges may admit points outside the circle; the
//! distance filter removes those later.

use geoq_types::{
    symbol_value, GeoPoint, Geohash, RangeQuery, BASE32, BITS_PER_CHAR, RANGE_END_SENTINEL,
};
use tracing::debug;

use crate::bits::{
    bounding_box_bits, bounding_box_coordinates, meters_to_longitude_degrees, validate_radius,
    wrap_longitude, MAX_BITS_PRECISION, METERS_PER_DEGREE_LATITUDE,
};
use crate::codec::{encode, validate_precision};
use crate::HashResult;

/// Factor applied to the radius before walking the bounding box, absorbing
/// the difference between the spherical distance model and the ellipsoidal
/// degree lengths.
const SEED_PADDING: f64 = 1.01;

/// The key range holding every geohash that shares the first `bits` bits
/// of `geohash`.
///
/// If the hash carries fewer symbols than `bits` needs, the range is the
/// whole subtree below the hash. Otherwise the last symbol keeps only its
/// significant bits, and the range ends at the next boundary at that bit
/// depth, or at the sentinel when that boundary overflows the alphabet.
pub fn geohash_query(geohash: &Geohash, bits: u32) -> RangeQuery {
    let bits = bits.clamp(1, MAX_BITS_PRECISION) as usize;
    let precision = bits.div_ceil(BITS_PER_CHAR);
    let hash = geohash.as_str();
    if hash.len() < precision {
        return RangeQuery::new(hash, format!("{hash}{RANGE_END_SENTINEL}"));
    }

    let hash = &hash[..precision];
    let base = &hash[..precision - 1];
    let last = symbol_value(hash.as_bytes()[precision - 1]).unwrap_or(0) as usize;
    let significant = bits - BITS_PER_CHAR * base.len();
    let unused = BITS_PER_CHAR - significant;

    let start = (last >> unused) << unused;
    let end = start + (1 << unused);
    let start_key = format!("{base}{}", BASE32[start] as char);
    if end >= BASE32.len() {
        RangeQuery::new(start_key, format!("{base}{RANGE_END_SENTINEL}"))
    } else {
        RangeQuery::new(start_key, format!("{base}{}", BASE32[end] as char))
    }
}

/// The covering set for a circle of `radius` meters around `center`, for
/// documents stored with geohashes of `precision` symbols.
///
/// The bit depth comes from [`bounding_box_bits`], capped at the stored
/// precision so that no range is narrower than a stored key. Seed points
/// are the nine bounding box coordinates plus one point per cell across the
/// padded bounding box; each seed's cell becomes a range. The result is
/// sorted by start key and contains no overlapping or touching ranges.
pub fn geohash_queries(
    center: &GeoPoint,
    radius: f64,
    precision: usize,
) -> HashResult<Vec<RangeQuery>> {
    validate_precision(precision)?;
    center.validate()?;
    validate_radius(radius)?;

    let max_bits = (precision * BITS_PER_CHAR) as u32;
    let bits = bounding_box_bits(center, radius)?.min(max_bits).max(1);
    let seed_precision = (bits as usize).div_ceil(BITS_PER_CHAR);

    let mut seeds: Vec<GeoPoint> = bounding_box_coordinates(center, radius)?.to_vec();
    seeds.extend(cell_walk(center, radius, bits)?);

    let mut ranges = Vec::with_capacity(seeds.len());
    for seed in &seeds {
        let hash = encode(seed, seed_precision)?;
        ranges.push(geohash_query(&hash, bits));
    }
    let merged = merge_ranges(ranges);

    debug!(
        latitude = center.latitude(),
        longitude = center.longitude(),
        radius,
        bits,
        seeds = seeds.len(),
        ranges = merged.len(),
        "planned covering ranges"
    );
    Ok(merged)
}

/// One point per geohash cell of depth `bits` across the padded bounding
/// box. A box that reaches a pole spans every longitude.
fn cell_walk(center: &GeoPoint, radius: f64, bits: u32) -> HashResult<Vec<GeoPoint>> {
    let lon_bits = bits.div_ceil(2) as i32;
    let lat_bits = (bits / 2) as i32;
    let cell_height = 180.0 / 2f64.powi(lat_bits);
    let cell_width = 360.0 / 2f64.powi(lon_bits);

    let padded = radius * SEED_PADDING;
    let lat_delta = padded / METERS_PER_DEGREE_LATITUDE;
    let north = (center.latitude() + lat_delta).min(90.0);
    let south = (center.latitude() - lat_delta).max(-90.0);
    let lon_delta = if north >= 90.0 || south <= -90.0 {
        180.0
    } else {
        meters_to_longitude_degrees(padded, north)
            .max(meters_to_longitude_degrees(padded, south))
            .min(180.0)
    };

    let lats = steps(south, north, cell_height);
    let lons = steps(
        center.longitude() - lon_delta,
        center.longitude() + lon_delta,
        cell_width,
    );
    let mut points = Vec::with_capacity(lats.len() * lons.len());
    for &lat in &lats {
        for &lon in &lons {
            points.push(GeoPoint::new(lat, wrap_longitude(lon))?);
        }
    }
    Ok(points)
}

/// `from`, then every `step` after it while below `to`, then `to`.
fn steps(from: f64, to: f64, step: f64) -> Vec<f64> {
    let mut values = Vec::new();
    let mut value = from;
    while value < to {
        values.push(value);
        value += step;
    }
    values.push(to);
    values
}

fn merge_ranges(mut ranges: Vec<RangeQuery>) -> Vec<RangeQuery> {
    ranges.sort();
    let mut merged: Vec<RangeQuery> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if last.touches(&range) => {
                if range.end > last.end {
                    last.end = range.end;
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}

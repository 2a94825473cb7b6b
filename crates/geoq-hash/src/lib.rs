//! Geohash math for geoq.
//!
//! Turns 2-D coordinates into sortable 1-D keys and a query circle into the
//! set of key ranges that covers it. Everything here is pure computation:
//! no I/O and no shared state.
//!
//! # Modules
//!
//! - [`codec`] -- point to geohash encoding at a chosen precision
//! - [`bits`] -- resolution/bit-count math and the 9-point bounding box
//! - [`planner`] -- circle to covering set of [`RangeQuery`] intervals
//! - [`distance`] -- haversine distance and the radius admission test
//!
//! [`RangeQuery`]: geoq_types::RangeQuery

pub mod bits;
pub mod codec;
pub mod distance;
pub mod planner;

pub use bits::{
    bounding_box_bits, bounding_box_coordinates, latitude_bits_for_resolution,
    longitude_bits_for_resolution, meters_to_longitude_degrees, wrap_longitude,
};
pub use codec::{encode, validate_precision, DEFAULT_PRECISION};
pub use distance::{calculate_distance, degrees_to_radians, is_within_radius};
pub use planner::{geohash_queries, geohash_query};

/// Result alias for geohash operations; every failure is a validation error.
pub type HashResult<T> = Result<T, geoq_types::ValidationError>;

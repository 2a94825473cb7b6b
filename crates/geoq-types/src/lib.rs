//! Foundation types for geoq.
//!
//! This crate provides the value types shared by every other geoq crate:
//! validated coordinates, geohash strings, half-open key ranges over the
//! geohash key space, and document identifiers.
//!
//! # Key Types
//!
//! - [`GeoPoint`] -- Validated latitude/longitude pair
//! - [`Geohash`] -- Base-32 geohash string over the geohash alphabet
//! - [`RangeQuery`] -- Half-open `[start, end)` interval over geohash keys
//! - [`DocumentId`] -- Stable identifier of a stored document
//! - [`DocumentData`] -- Opaque application payload (JSON object)

pub mod document;
pub mod error;
pub mod geohash;
pub mod point;
pub mod range;

pub use document::{DocumentData, DocumentId};
pub use error::ValidationError;
pub use geohash::{symbol_value, Geohash, BASE32, BITS_PER_CHAR, MAX_PRECISION};
pub use point::GeoPoint;
pub use range::{RangeQuery, RANGE_END_SENTINEL};

//! Radius queries over a geoq document store.
//!
//! A [`GeoQuery`] turns a center and radius into the set of geohash ranges
//! that cover the circle, scans each range in the store, and merges the
//! candidates into one result set: decoded, filtered by true distance and
//! `where` clauses, ordered nearest first, and truncated to the limit.
//!
//! Queries run once with [`GeoQuery::get`] or stay live with
//! [`GeoQuery::on_snapshot`], which delivers a [`QuerySnapshot`] each time
//! the result set changes, together with the per-document changes since the
//! previous one.
//!
//! # Key Types
//!
//! - [`GeoQuery`] -- immutable query value with builder methods
//! - [`NearCriteria`] -- partial center/radius update
//! - [`QuerySnapshot`] / [`GeoDocumentSnapshot`] -- an ordered result set
//! - [`DocumentChange`] -- one added, removed, or modified entry
//! - [`ListenerRegistration`] -- handle to stop or retarget a live listener
//! - [`QueryConfig`] -- precision and listener behaviour

pub mod config;
pub mod criteria;
pub mod diff;
pub mod engine;
pub mod error;
pub mod query;
pub mod snapshot;

pub use config::QueryConfig;
pub use criteria::{validate_filter_field, NearCriteria, QueryCriteria, ScanKey};
pub use diff::{diff_results, diff_with_moves};
pub use engine::{ListenerRegistration, SnapshotCallback};
pub use error::{QueryError, QueryResult};
pub use query::GeoQuery;
pub use snapshot::{DocumentChange, GeoDocumentSnapshot, QuerySnapshot};

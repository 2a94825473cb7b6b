//! Document store boundary for geoq.
//!
//! The geo layer needs very little from a store: range scans on one flat
//! field, equality/range filters, a limit, and a change feed per query.
//! This crate defines that contract, the storage layout geo documents use
//! inside it, and an in-memory backend that implements it.
//!
//! # Key Types
//!
//! - [`DocumentStore`] -- async trait every backend implements
//! - [`StoreQuery`] -- range on the geohash field plus filters and limit
//! - [`FieldFilter`] / [`WhereOp`] -- one `where` clause
//! - [`StoredDocument`] / [`StoreChange`] -- what fetches and change feeds carry
//! - [`InMemoryDocumentStore`] -- `BTreeMap`-backed store with live subscriptions
//!
//! # Storage Layout
//!
//! See [`codec`]: geo documents are `{g, l, d}` objects; everything else is
//! foreign and passes through decoding untouched.

pub mod codec;
pub mod document;
pub mod error;
pub mod memory;
pub mod query;
pub mod traits;

pub use codec::{
    decode_document, decode_location, encode_document, encode_set_document,
    encode_update_document, find_coordinates, is_geo_document, payload_field_path,
    validate_geo_document, DEFAULT_COORDINATES_KEY, GEOHASH_FIELD, LOCATION_FIELD, PAYLOAD_FIELD,
};
pub use document::{ChangeBatch, ChangeKind, StoreChange, StoredDocument};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryDocumentStore;
pub use query::{lookup_field, lookup_path, FieldFilter, GetOptions, Source, StoreQuery, WhereOp};
pub use traits::{ChangeStream, DocumentStore};

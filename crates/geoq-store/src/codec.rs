//! Storage document layout.
//!
//! A geo document wraps the application payload with its location and
//! geohash:
//!
//! ```text
//! { "g": "<geohash>", "l": {"latitude": .., "longitude": ..}, "d": { ..payload.. } }
//! ```
//!
//! Anything else in the collection is a foreign document. Decoding never
//! fails: foreign documents pass through unchanged.

use geoq_types::{DocumentData, GeoPoint, Geohash, ValidationError};
use serde_json::Value;

use crate::query::lookup_field;

pub const GEOHASH_FIELD: &str = "g";
pub const LOCATION_FIELD: &str = "l";
pub const PAYLOAD_FIELD: &str = "d";

/// Payload key searched for coordinates when no custom key is given.
pub const DEFAULT_COORDINATES_KEY: &str = "coordinates";

/// Build a storage document from its three parts.
pub fn encode_document(location: &GeoPoint, geohash: &Geohash, payload: DocumentData) -> Value {
    Value::Object(document_fields(location, geohash, payload))
}

fn document_fields(location: &GeoPoint, geohash: &Geohash, payload: DocumentData) -> DocumentData {
    let mut doc = DocumentData::new();
    doc.insert(GEOHASH_FIELD.into(), Value::String(geohash.as_str().to_string()));
    doc.insert(LOCATION_FIELD.into(), location.to_value());
    doc.insert(PAYLOAD_FIELD.into(), Value::Object(payload));
    doc
}

/// Locate and geohash the coordinates a payload carries.
fn locate(
    data: &DocumentData,
    custom_key: Option<&str>,
    precision: usize,
) -> Result<(GeoPoint, Geohash), ValidationError> {
    let key = custom_key.unwrap_or(DEFAULT_COORDINATES_KEY);
    let location = find_coordinates(data, custom_key).ok_or_else(|| {
        ValidationError::InvalidLocation(format!("payload has no valid coordinates at `{key}`"))
    })?;
    let geohash = geoq_hash::encode(&location, precision)?;
    Ok((location, geohash))
}

/// Check that `doc` has the storage layout: a valid geohash under `g`, a
/// valid point under `l` and an object under `d`.
pub fn validate_geo_document(doc: &Value) -> Result<(), ValidationError> {
    let Some(fields) = doc.as_object() else {
        return Err(ValidationError::InvalidArgument(
            "document must be an object".into(),
        ));
    };

    match fields.get(GEOHASH_FIELD).and_then(Value::as_str) {
        Some(hash) => {
            Geohash::parse(hash)?;
        }
        None => {
            return Err(ValidationError::InvalidGeohash(
                "document has no string geohash".into(),
            ))
        }
    }

    let location = fields.get(LOCATION_FIELD).ok_or_else(|| {
        ValidationError::InvalidLocation("document has no location".into())
    })?;
    if GeoPoint::from_value(location).is_none() {
        return Err(ValidationError::InvalidLocation(format!(
            "document location is not a valid point: {location}"
        )));
    }

    if !fields.get(PAYLOAD_FIELD).is_some_and(Value::is_object) {
        return Err(ValidationError::InvalidArgument(
            "document payload must be an object".into(),
        ));
    }
    Ok(())
}

pub fn is_geo_document(doc: &Value) -> bool {
    validate_geo_document(doc).is_ok()
}

/// The payload of a geo document, or the document itself when it is
/// foreign.
pub fn decode_document(doc: &Value) -> Value {
    if is_geo_document(doc) {
        if let Some(payload) = doc.get(PAYLOAD_FIELD) {
            return payload.clone();
        }
    }
    doc.clone()
}

/// The stored location of a geo document.
pub fn decode_location(doc: &Value) -> Option<GeoPoint> {
    if !is_geo_document(doc) {
        return None;
    }
    doc.get(LOCATION_FIELD).and_then(GeoPoint::from_value)
}

/// Read the coordinates an application payload carries, at `custom_key`
/// (dotted paths allowed) or at [`DEFAULT_COORDINATES_KEY`].
pub fn find_coordinates(data: &DocumentData, custom_key: Option<&str>) -> Option<GeoPoint> {
    let key = custom_key.unwrap_or(DEFAULT_COORDINATES_KEY);
    lookup_field(data, key).and_then(GeoPoint::from_value)
}

/// Wrap a payload that carries its own coordinates into a storage
/// document, geohashed at `precision`.
pub fn encode_set_document(
    data: DocumentData,
    custom_key: Option<&str>,
    precision: usize,
) -> Result<Value, ValidationError> {
    let (location, geohash) = locate(&data, custom_key, precision)?;
    Ok(encode_document(&location, &geohash, data))
}

/// Translate a partial update of a payload into a partial update of the
/// storage document.
///
/// An update that carries coordinates replaces `g`, `l` and `d` wholesale.
/// Otherwise every field is re-keyed under `d.` so that only the payload is
/// touched.
pub fn encode_update_document(
    data: DocumentData,
    custom_key: Option<&str>,
    precision: usize,
) -> Result<DocumentData, ValidationError> {
    let key = custom_key.unwrap_or(DEFAULT_COORDINATES_KEY);
    if lookup_field(&data, key).is_some() {
        let (location, geohash) = locate(&data, custom_key, precision)?;
        return Ok(document_fields(&location, &geohash, data));
    }

    Ok(data
        .into_iter()
        .map(|(field, value)| (payload_field_path(&field), value))
        .collect())
}

/// Translate a payload field path into a storage document field path.
pub fn payload_field_path(field: &str) -> String {
    format!("{PAYLOAD_FIELD}.{field}")
}

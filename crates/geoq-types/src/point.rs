use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A validated geographic coordinate.
///
/// Latitude lies in `[-90, 90]` and longitude in `[-180, 180]`; both are
/// finite. Serialized as `{"latitude": .., "longitude": ..}`.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

impl GeoPoint {
    /// Create a point, validating both coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        let point = Self {
            latitude,
            longitude,
        };
        point.validate()?;
        Ok(point)
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Check the coordinate invariants.
    ///
    /// Points built through [`GeoPoint::new`] always pass; points obtained
    /// by deserializing foreign data may not.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ValidationError::InvalidLocation(format!(
                "latitude must be within [-90, 90], got {}",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ValidationError::InvalidLocation(format!(
                "longitude must be within [-180, 180], got {}",
                self.longitude
            )));
        }
        Ok(())
    }

    /// Read a point from a JSON value of the form
    /// `{"latitude": f64, "longitude": f64}`.
    ///
    /// Returns `None` for any other shape or for out-of-range coordinates.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let object = value.as_object()?;
        let latitude = object.get("latitude")?.as_f64()?;
        let longitude = object.get("longitude")?.as_f64()?;
        Self::new(latitude, longitude).ok()
    }

    /// JSON representation used inside stored documents.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "latitude": self.latitude,
            "longitude": self.longitude,
        })
    }
}

impl fmt::Debug for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GeoPoint({}, {})", self.latitude, self.longitude)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

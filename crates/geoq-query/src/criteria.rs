use geoq_hash::geohash_queries;
use geoq_store::{payload_field_path, FieldFilter, StoreQuery, WhereOp, GEOHASH_FIELD};
use geoq_types::{GeoPoint, RangeQuery, ValidationError};
use serde_json::Value;

/// A partial update of a query's center and radius. Omitted fields keep
/// their previous value.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NearCriteria {
    pub center: Option<GeoPoint>,
    /// Radius in meters.
    pub radius: Option<f64>,
}

impl NearCriteria {
    pub fn new(center: GeoPoint, radius: f64) -> Self {
        Self {
            center: Some(center),
            radius: Some(radius),
        }
    }

    pub fn center(center: GeoPoint) -> Self {
        Self {
            center: Some(center),
            radius: None,
        }
    }

    pub fn radius(radius: f64) -> Self {
        Self {
            center: None,
            radius: Some(radius),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.center.is_none() && self.radius.is_none() {
            return Err(ValidationError::InvalidArgument(
                "near requires a center, a radius, or both".into(),
            ));
        }
        if let Some(ref center) = self.center {
            center.validate()?;
        }
        if let Some(radius) = self.radius {
            if !radius.is_finite() || radius < 0.0 {
                return Err(ValidationError::InvalidArgument(format!(
                    "radius must be a finite, non-negative number of meters, got {radius}"
                )));
            }
        }
        Ok(())
    }
}

/// Validate a `where` clause field name, given in payload terms.
pub fn validate_filter_field(field: &str) -> Result<(), ValidationError> {
    if field.is_empty() {
        return Err(ValidationError::InvalidArgument(
            "where clause needs a field name".into(),
        ));
    }
    if field == GEOHASH_FIELD {
        return Err(ValidationError::InvalidArgument(format!(
            "`{GEOHASH_FIELD}` is reserved for the geohash range"
        )));
    }
    Ok(())
}

/// One store scan a query is made of: the whole collection, or one
/// geohash range.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScanKey {
    Collection,
    Geohash(RangeQuery),
}

/// The immutable description of a geo query.
///
/// Every builder method returns a new value. A query is geo-bound once it
/// has both a center and a radius.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryCriteria {
    center: Option<GeoPoint>,
    radius: Option<f64>,
    limit: Option<usize>,
    filters: Vec<FieldFilter>,
}

impl QueryCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn center(&self) -> Option<GeoPoint> {
        self.center
    }

    pub fn radius(&self) -> Option<f64> {
        self.radius
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// The `where` clauses, in payload terms.
    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn is_geo_bound(&self) -> bool {
        self.center.is_some() && self.radius.is_some()
    }

    pub fn with_near(&self, near: NearCriteria) -> Result<Self, ValidationError> {
        near.validate()?;
        Ok(Self {
            center: near.center.or(self.center),
            radius: near.radius.or(self.radius),
            ..self.clone()
        })
    }

    pub fn with_filter(
        &self,
        field: &str,
        op: WhereOp,
        value: Value,
    ) -> Result<Self, ValidationError> {
        validate_filter_field(field)?;
        let mut next = self.clone();
        next.filters.push(FieldFilter::new(field, op, value));
        Ok(next)
    }

    pub fn with_limit(&self, limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..self.clone()
        }
    }

    /// Returns `true` if a decoded payload satisfies every `where` clause.
    pub fn matches_filters(&self, payload: &Value) -> bool {
        self.filters.iter().all(|filter| filter.matches(payload))
    }

    /// The store scans this query runs, keyed for diffing against a
    /// previous set.
    ///
    /// Filters are translated to payload paths. A geo-bound query scans one
    /// range per covering range without a limit: a store orders a range by
    /// geohash, not distance, so the limit is applied after the merge. Any
    /// other query scans the collection with the limit pushed down.
    pub fn scans(&self, precision: usize) -> Result<Vec<(ScanKey, StoreQuery)>, ValidationError> {
        let filters: Vec<FieldFilter> = self
            .filters
            .iter()
            .map(|f| FieldFilter::new(payload_field_path(&f.field), f.op, f.value.clone()))
            .collect();
        let base = StoreQuery {
            range: None,
            filters,
            limit: if self.is_geo_bound() { None } else { self.limit },
        };

        match (self.center, self.radius) {
            (Some(center), Some(radius)) => Ok(geohash_queries(&center, radius, precision)?
                .into_iter()
                .map(|range| (ScanKey::Geohash(range.clone()), base.clone().with_range(range)))
                .collect()),
            _ => Ok(vec![(ScanKey::Collection, base)]),
        }
    }
}

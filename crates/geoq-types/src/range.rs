use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Sentinel that sorts after every geohash symbol. Used as the open upper
/// bound of a range whose last symbol would overflow the alphabet.
pub const RANGE_END_SENTINEL: char = '~';

/// Half-open interval `[start, end)` over the geohash key space.
///
/// Ranges order by `start`, then `end`, which is the order the planner
/// emits them in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RangeQuery {
    pub start: String,
    pub end: String,
}

impl RangeQuery {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Returns `true` if `key` sorts inside `[start, end)`.
    pub fn contains(&self, key: &str) -> bool {
        key >= self.start.as_str() && key < self.end.as_str()
    }

    /// Returns `true` if `other` starts at or before this range's end, i.e.
    /// the two intervals touch or overlap when `self.start <= other.start`.
    pub fn touches(&self, other: &RangeQuery) -> bool {
        other.start <= self.end && self.start <= other.end
    }
}

impl fmt::Display for RangeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

impl FromStr for RangeQuery {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(start), Some(end), None) => Ok(Self::new(start, end)),
            _ => Err(ValidationError::InvalidArgument(format!(
                "not a valid range string: {s}"
            ))),
        }
    }
}

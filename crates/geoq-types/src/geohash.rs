use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The geohash alphabet: digits plus lowercase letters without `a`, `i`,
/// `l` and `o`. Symbol order matches byte order, so geohashes sort the
/// same way as the bit strings they encode.
pub const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Number of bits carried by one geohash symbol.
pub const BITS_PER_CHAR: usize = 5;

/// Longest supported geohash.
pub const MAX_PRECISION: usize = 22;

/// A geohash string over [`BASE32`] with length `1..=MAX_PRECISION`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Geohash(String);

impl Geohash {
    /// Parse and validate a geohash string.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        if s.is_empty() {
            return Err(ValidationError::InvalidGeohash(
                "geohash cannot be empty".into(),
            ));
        }
        if s.len() > MAX_PRECISION {
            return Err(ValidationError::InvalidGeohash(format!(
                "geohash longer than {MAX_PRECISION} characters: {s}"
            )));
        }
        if let Some(bad) = s.bytes().find(|b| symbol_value(*b).is_none()) {
            return Err(ValidationError::InvalidGeohash(format!(
                "invalid character {:?} in {s}",
                bad as char
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Build a geohash from a string already known to be valid.
    ///
    /// Only the encoder uses this; it emits alphabet symbols exclusively.
    #[doc(hidden)]
    pub fn from_encoded(s: String) -> Self {
        debug_assert!(Self::parse(&s).is_ok());
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`: an empty geohash cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Value (`0..32`) of a geohash symbol, or `None` for bytes outside the
/// alphabet.
pub fn symbol_value(symbol: u8) -> Option<u8> {
    BASE32.iter().position(|c| *c == symbol).map(|i| i as u8)
}

impl fmt::Debug for Geohash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Geohash({})", self.0)
    }
}

impl fmt::Display for Geohash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Geohash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Geohash {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Geohash> for String {
    fn from(hash: Geohash) -> Self {
        hash.0
    }
}

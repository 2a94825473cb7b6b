use std::path::Path;

use geoq_hash::{validate_precision, DEFAULT_PRECISION};
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};

/// Configuration shared by one-shot queries and live listeners.
///
/// ```toml
/// precision = 10
/// emit_initial_empty = true
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Geohash length of stored documents. Range bounds never get finer
    /// than this.
    pub precision: usize,
    /// Whether a listener's first snapshot is delivered even when it holds
    /// no documents.
    pub emit_initial_empty: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            emit_initial_empty: true,
        }
    }
}

impl QueryConfig {
    pub fn with_precision(precision: usize) -> QueryResult<Self> {
        let config = Self {
            precision,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> QueryResult<()> {
        validate_precision(self.precision)?;
        Ok(())
    }

    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> QueryResult<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| QueryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> QueryResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| QueryError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }
}

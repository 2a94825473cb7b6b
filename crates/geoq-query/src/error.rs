use geoq_store::StoreError;
use geoq_types::ValidationError;

/// Errors produced by geo queries and live listeners.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// A caller-supplied value can never be valid.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The document store failed; passed through unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The listener has been unsubscribed.
    #[error("listener is unsubscribed")]
    Closed,
}

/// Result alias for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

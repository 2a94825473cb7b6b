use geoq_types::ValidationError;

/// Errors surfaced by a document store.
///
/// The geo layer never interprets these; they pass through to the caller of
/// `get` or to the snapshot callback unchanged.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failure reported by the storage backend.
    #[error("backend error: {0}")]
    Backend(String),

    /// The backend cannot execute the query as written.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A document could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A write carried a value that can never be valid.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The change stream or the store itself is gone.
    #[error("change stream closed")]
    Closed,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

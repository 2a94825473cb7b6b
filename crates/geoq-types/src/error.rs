use thiserror::Error;

/// Errors raised when a caller supplies a value that can never be valid.
///
/// Validation always happens synchronously at the call that introduced the
/// bad value, before any store interaction.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("invalid location: {0}")]
    InvalidLocation(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid geohash: {0}")]
    InvalidGeohash(String),
}

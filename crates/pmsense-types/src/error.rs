//! Error types for response normalization in pmsense-types.

use thiserror::Error;

/// Errors that can occur when normalizing a driver response.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The response did not match any of the known measurement shapes.
    #[error("Unrecognized response shape: {0}")]
    UnrecognizedShape(String),

    /// The response was well-formed but carried unusable data.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using pmsense-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

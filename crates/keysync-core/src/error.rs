//! Error types for keysync core.

use thiserror::Error;

/// Errors raised while constructing or decoding core values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input to a digest vector or manifest constructor.
    #[error("create error: {0}")]
    Create(String),

    /// Input violates the strictly-ascending, duplicate-free invariant.
    #[error("digests not strictly ascending at index {index}")]
    Unsorted { index: usize },

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("malformed object: {0}")]
    MalformedObject(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

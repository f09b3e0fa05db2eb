//! Error types for the store module.

use thiserror::Error;

use keysync_core::CoreError;

/// Errors that can occur during data source operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object encoding or manifest maintenance failed.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// An object lacks an attribute that is part of the primary key.
    #[error("missing primary key attribute: {0}")]
    MissingAttribute(String),

    /// The merge policy refused to reconcile two objects.
    #[error("merge failed: {0}")]
    MergeFailed(String),

    /// Object not found.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A lock guarding the store was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

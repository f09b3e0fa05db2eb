//! Error types for sync nodes.

use keysync_core::CoreError;
use keysync_engine::SyncError;
use keysync_store::StoreError;
use thiserror::Error;

/// Errors that can occur while driving a sync node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Manifest or object construction failed.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Peers kept exchanging messages past the round limit.
    #[error("peers still exchanging messages after {rounds} rounds")]
    NotQuiet { rounds: usize },
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

//! Error types for the sync engine.

use thiserror::Error;

use keysync_core::CoreError;
use keysync_store::StoreError;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Protocol version mismatch with peer.
    #[error("protocol version mismatch: local={local}, peer={peer}")]
    VersionMismatch { local: u8, peer: u8 },

    /// A peer message failed to decode or violates the manifest invariants.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The data source failed while a message was being applied.
    #[error("internal error: {0}")]
    Internal(String),

    /// Data source operation failed outside message application.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Digest vector or manifest construction failed.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Outgoing message could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Persisted engine state could not be restored.
    #[error("invalid engine state: {0}")]
    InvalidState(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Peer is not connected.
    #[error("peer not connected: {0}")]
    PeerNotConnected(String),

    /// The local store kept changing while a sync step was computed.
    #[error("sync cancelled: generation advanced from {started} to {current}")]
    Cancelled { started: u64, current: u64 },
}

impl SyncError {
    /// True for errors caused by a malformed or incompatible peer message.
    pub fn is_invalid_message(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidMessage(_) | SyncError::VersionMismatch { .. }
        )
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

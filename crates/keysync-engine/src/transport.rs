//! Transport abstraction for sync messages.
//!
//! The engine produces and consumes opaque byte payloads; a transport only
//! has to deliver them to the right peer. Implementations may use a cloud
//! relay, a key-value store, or anything else.

use async_trait::async_trait;

use crate::error::{Result, SyncError};
use crate::messages::PeerId;

/// Transport trait for sending and receiving encoded sync messages.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an encoded message to a specific peer.
    async fn send(&self, peer: &PeerId, payload: Vec<u8>) -> Result<()>;

    /// Receive the next message from any peer.
    ///
    /// Blocks until a message is available or the transport closes.
    async fn recv(&self) -> Result<(PeerId, Vec<u8>)>;

    /// Receive with timeout.
    ///
    /// Returns None if timeout expires before a message arrives.
    async fn recv_timeout(&self, timeout: std::time::Duration)
        -> Result<Option<(PeerId, Vec<u8>)>>;

    /// The local peer's identity.
    fn local_peer_id(&self) -> PeerId;

    /// List currently connected peers.
    async fn connected_peers(&self) -> Result<Vec<PeerId>>;

    /// Check if a specific peer is connected.
    async fn is_connected(&self, peer: &PeerId) -> bool;
}

/// In-process loopback transport.
///
/// Every transport created from one [`memory::MemoryNetwork`] can reach
/// every other one through bounded channels.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, RwLock};

    const CHANNEL_CAPACITY: usize = 1024;

    #[derive(Debug)]
    struct Envelope {
        from: PeerId,
        payload: Vec<u8>,
    }

    /// Shared routing table for memory transports.
    #[derive(Default)]
    pub struct MemoryNetwork {
        senders: RwLock<HashMap<PeerId, mpsc::Sender<Envelope>>>,
    }

    impl MemoryNetwork {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Attach a transport for `peer_id`, replacing any previous one.
        pub async fn create_transport(self: &Arc<Self>, peer_id: PeerId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            self.senders.write().await.insert(peer_id, tx);

            MemoryTransport {
                peer_id,
                network: Arc::clone(self),
                receiver: RwLock::new(rx),
            }
        }

        /// Detach a peer; later sends to it fail with `PeerNotConnected`.
        pub async fn disconnect(&self, peer_id: &PeerId) -> bool {
            self.senders.write().await.remove(peer_id).is_some()
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        peer_id: PeerId,
        network: Arc<MemoryNetwork>,
        receiver: RwLock<mpsc::Receiver<Envelope>>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, peer: &PeerId, payload: Vec<u8>) -> Result<()> {
            let sender = self
                .network
                .senders
                .read()
                .await
                .get(peer)
                .cloned()
                .ok_or_else(|| SyncError::PeerNotConnected(peer.to_string()))?;

            sender
                .send(Envelope {
                    from: self.peer_id,
                    payload,
                })
                .await
                .map_err(|_| SyncError::TransportError("peer disconnected".into()))
        }

        async fn recv(&self) -> Result<(PeerId, Vec<u8>)> {
            let mut rx = self.receiver.write().await;
            match rx.recv().await {
                Some(envelope) => Ok((envelope.from, envelope.payload)),
                None => Err(SyncError::TransportError("channel closed".into())),
            }
        }

        async fn recv_timeout(
            &self,
            timeout: std::time::Duration,
        ) -> Result<Option<(PeerId, Vec<u8>)>> {
            let mut rx = self.receiver.write().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(envelope)) => Ok(Some((envelope.from, envelope.payload))),
                Ok(None) => Err(SyncError::TransportError("channel closed".into())),
                Err(_) => Ok(None),
            }
        }

        fn local_peer_id(&self) -> PeerId {
            self.peer_id
        }

        async fn connected_peers(&self) -> Result<Vec<PeerId>> {
            let senders = self.network.senders.read().await;
            let mut peers: Vec<PeerId> = senders
                .keys()
                .filter(|id| *id != &self.peer_id)
                .copied()
                .collect();
            peers.sort();
            Ok(peers)
        }

        async fn is_connected(&self, peer: &PeerId) -> bool {
            self.network.senders.read().await.contains_key(peer)
        }
    }
}

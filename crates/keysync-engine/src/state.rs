//! Engine state persistence.
//!
//! Peer states survive restarts as a CBOR blob. The local manifest cache is
//! not persisted; it is rebuilt from the data source on first use.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use keysync_core::{Digest, DigestVector, Manifest};
use keysync_store::DataSource;

use crate::engine::{EngineConfig, SyncEngine};
use crate::error::{Result, SyncError};
use crate::messages::PeerId;
use crate::peer::{PeerState, Tier};

/// Format version of exported engine state.
pub const STATE_VERSION: u8 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEngine {
    version: u8,
    peers: Vec<PersistedPeer>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedPeer {
    peer_id: PeerId,
    tier: Tier,
    last_known_peer_manifest_digest: Option<Digest>,
    last_sent_manifest_digest: Option<Digest>,
    generation: u64,
    peer_manifest: Option<Bytes>,
    pending_requests: Bytes,
}

impl PersistedPeer {
    fn from_state(state: &PeerState) -> Self {
        Self {
            peer_id: state.peer_id(),
            tier: state.tier,
            last_known_peer_manifest_digest: state.last_known_peer_manifest_digest,
            last_sent_manifest_digest: state.last_sent_manifest_digest,
            generation: state.generation,
            peer_manifest: state
                .peer_manifest
                .as_ref()
                .map(|manifest| Bytes::from(manifest.to_bytes())),
            pending_requests: Bytes::from(state.pending_requests.to_bytes()),
        }
    }

    fn into_state(self) -> Result<PeerState> {
        let invalid = |what: &str, e: keysync_core::CoreError| {
            SyncError::InvalidState(format!("peer {}: {}: {}", self.peer_id, what, e))
        };

        let peer_manifest = self
            .peer_manifest
            .as_deref()
            .map(Manifest::from_bytes)
            .transpose()
            .map_err(|e| invalid("peer manifest", e))?;
        let pending_requests = DigestVector::from_bytes(&self.pending_requests)
            .map_err(|e| invalid("pending requests", e))?;

        let mut state = PeerState::new(self.peer_id);
        state.tier = match self.tier {
            // The local store may have changed while we were not running.
            Tier::Synced => Tier::ManifestExchanged,
            tier => tier,
        };
        state.last_known_peer_manifest_digest = self.last_known_peer_manifest_digest;
        state.last_sent_manifest_digest = self.last_sent_manifest_digest;
        state.generation = self.generation;
        state.peer_manifest = peer_manifest;
        state.pending_requests = pending_requests;
        Ok(state)
    }
}

impl<D: DataSource> SyncEngine<D> {
    /// Serialize every peer state.
    pub async fn export_state(&self) -> Result<Vec<u8>> {
        let state = self.state.lock().await;
        let mut peers: Vec<PersistedPeer> =
            state.peers.values().map(PersistedPeer::from_state).collect();
        peers.sort_by_key(|peer| peer.peer_id);

        let persisted = PersistedEngine {
            version: STATE_VERSION,
            peers,
        };
        let mut buf = Vec::new();
        ciborium::into_writer(&persisted, &mut buf)
            .map_err(|e| SyncError::Encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Create an engine from state produced by [`SyncEngine::export_state`].
    ///
    /// Every stored manifest is re-validated. Peers that were `Synced` come
    /// back as `ManifestExchanged`.
    pub fn with_state(data_source: Arc<D>, config: EngineConfig, bytes: &[u8]) -> Result<Self> {
        let persisted: PersistedEngine = ciborium::from_reader(bytes)
            .map_err(|e| SyncError::InvalidState(e.to_string()))?;
        if persisted.version != STATE_VERSION {
            return Err(SyncError::InvalidState(format!(
                "unsupported state version {}",
                persisted.version
            )));
        }

        let mut peers = HashMap::with_capacity(persisted.peers.len());
        for peer in persisted.peers {
            let peer_id = peer.peer_id;
            if peers.insert(peer_id, peer.into_state()?).is_some() {
                return Err(SyncError::InvalidState(format!(
                    "peer {} listed twice",
                    peer_id
                )));
            }
        }

        tracing::debug!(peers = peers.len(), "restored engine state");
        Ok(Self::from_parts(data_source, config, peers))
    }
}

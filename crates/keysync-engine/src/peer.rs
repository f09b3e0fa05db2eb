//! Per-peer protocol state.

use serde::{Deserialize, Serialize};

use keysync_core::{Digest, DigestVector, Manifest};

use crate::messages::PeerId;

/// How much the engine currently knows about a peer's store.
///
/// First contact always lands on `DigestExchanged`, even when the digests
/// already match. A peer falls back to `ManifestExchanged` when either
/// side's manifest changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Never contacted.
    Unknown,
    /// Manifest digests have been exchanged.
    DigestExchanged,
    /// Full manifests have been exchanged.
    ManifestExchanged,
    /// Both sides hold the same manifest.
    Synced,
}

/// What the engine remembers about one peer.
#[derive(Debug, Clone)]
pub struct PeerState {
    peer_id: PeerId,
    pub(crate) last_known_peer_manifest_digest: Option<Digest>,
    pub(crate) last_sent_manifest_digest: Option<Digest>,
    pub(crate) tier: Tier,
    pub(crate) generation: u64,
    pub(crate) peer_manifest: Option<Manifest>,
    pub(crate) pending_requests: DigestVector,
    /// Bumped on every commit; used to detect concurrent updates.
    pub(crate) revision: u64,
}

impl PeerState {
    pub(crate) fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            last_known_peer_manifest_digest: None,
            last_sent_manifest_digest: None,
            tier: Tier::Unknown,
            generation: 0,
            peer_manifest: None,
            pending_requests: DigestVector::new(),
            revision: 0,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Digest of the peer's manifest as last reported by the peer.
    pub fn last_known_peer_manifest_digest(&self) -> Option<Digest> {
        self.last_known_peer_manifest_digest
    }

    /// Digest of the local manifest last sent to the peer.
    pub fn last_sent_manifest_digest(&self) -> Option<Digest> {
        self.last_sent_manifest_digest
    }

    /// Local store generation when the peer was last evaluated.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The peer's manifest, if received in full and still current.
    pub fn peer_manifest(&self) -> Option<&Manifest> {
        self.peer_manifest.as_ref()
    }

    /// Digests the peer advertised that the local store still lacks.
    pub fn pending_requests(&self) -> &DigestVector {
        &self.pending_requests
    }

    /// The peer manifest, but only if it matches the last digest the peer
    /// reported.
    pub(crate) fn current_peer_manifest(&self) -> Option<&Manifest> {
        let manifest = self.peer_manifest.as_ref()?;
        (Some(manifest.digest()) == self.last_known_peer_manifest_digest).then_some(manifest)
    }

    pub(crate) fn set_tier(&mut self, tier: Tier) {
        if self.tier != tier {
            tracing::debug!(peer = %self.peer_id, from = ?self.tier, to = ?tier, "peer tier changed");
            self.tier = tier;
        }
    }

    /// Record a digest reported by the peer, dropping a manifest it no
    /// longer matches.
    pub(crate) fn record_peer_digest(&mut self, digest: Digest) {
        self.last_known_peer_manifest_digest = Some(digest);
        if self
            .peer_manifest
            .as_ref()
            .is_some_and(|manifest| manifest.digest() != digest)
        {
            self.peer_manifest = None;
            self.pending_requests = DigestVector::new();
        }
    }
}

//! Sync engine state machine.
//!
//! The engine reconciles a local [`DataSource`] with any number of peers.
//! For each peer it decides how much detail the next message needs: a
//! manifest digest, a full manifest, or a manifest plus the objects the
//! peer is known to lack.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use keysync_core::{Digest, Manifest, Object};
use keysync_store::{DataSource, MergeResult, ObjectBackup};

use crate::error::{Result, SyncError};
use crate::messages::{limits, DecodedMessage, MessageKind, PeerId, SyncMessage};
use crate::peer::{PeerState, Tier};

/// Configuration for engine behavior.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum objects carried by one manifest-and-objects message.
    pub max_objects_per_message: usize,
    /// How often a step is recomputed after the store changed under it.
    pub max_stale_retries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_objects_per_message: 50,
            max_stale_retries: 3,
        }
    }
}

/// Outcome of handling one peer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleReport {
    /// Whether the message changed the local store or the peer's state.
    pub applied: bool,
    /// The peer's tier after the message.
    pub tier: Tier,
    /// Carried objects that replaced or merged into local objects.
    pub merged: usize,
    /// Local objects the peer's manifest lacks.
    pub peer_missing: usize,
    /// Objects the peer advertised that are still missing locally.
    pub still_needed: usize,
}

#[derive(Debug)]
pub(crate) struct LocalManifest {
    pub(crate) manifest: Arc<Manifest>,
    pub(crate) generation: u64,
}

#[derive(Debug, Default)]
pub(crate) struct EngineState {
    pub(crate) local: Option<LocalManifest>,
    pub(crate) peers: HashMap<PeerId, PeerState>,
}

/// Next message for a peer together with the tier it moves the peer to.
struct Plan {
    message: Option<SyncMessage>,
    tier: Tier,
}

/// Manifest-based sync engine over a data source.
pub struct SyncEngine<D: DataSource> {
    pub(crate) data_source: Arc<D>,
    pub(crate) config: EngineConfig,
    pub(crate) state: Mutex<EngineState>,
    /// Serializes object application so rollbacks never interleave.
    apply_lock: Mutex<()>,
}

impl<D: DataSource> SyncEngine<D> {
    /// Create an engine. No snapshot is taken until the first sync step.
    pub fn new(data_source: Arc<D>, config: EngineConfig) -> Self {
        Self::from_parts(data_source, config, HashMap::new())
    }

    /// Create an engine with the default configuration.
    pub fn create(data_source: Arc<D>) -> Self {
        Self::new(data_source, EngineConfig::default())
    }

    pub(crate) fn from_parts(
        data_source: Arc<D>,
        config: EngineConfig,
        peers: HashMap<PeerId, PeerState>,
    ) -> Self {
        Self {
            data_source,
            config,
            state: Mutex::new(EngineState { local: None, peers }),
            apply_lock: Mutex::new(()),
        }
    }

    pub fn data_source(&self) -> &Arc<D> {
        &self.data_source
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current generation of the local store.
    pub fn generation(&self) -> u64 {
        self.data_source.generation()
    }

    /// Current local manifest.
    pub async fn local_manifest(&self) -> Result<Arc<Manifest>> {
        Ok(self.refresh_local().await?.0)
    }

    /// Snapshot of one peer's state.
    pub async fn peer_state(&self, peer: &PeerId) -> Option<PeerState> {
        self.state.lock().await.peers.get(peer).cloned()
    }

    /// Snapshot of every known peer's state.
    pub async fn peers(&self) -> Vec<PeerState> {
        let state = self.state.lock().await;
        let mut peers: Vec<PeerState> = state.peers.values().cloned().collect();
        peers.sort_by_key(PeerState::peer_id);
        peers
    }

    /// Drop everything known about a peer. Returns whether it was known.
    pub async fn forget_peer(&self, peer: &PeerId) -> bool {
        self.state.lock().await.peers.remove(peer).is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outgoing
    // ─────────────────────────────────────────────────────────────────────────

    /// Compute the next message for `peer`.
    ///
    /// Returns `None` when the peer is already known to hold the local
    /// manifest. With `force`, a digest probe is always sent.
    pub async fn sync_with_peer(&self, peer: PeerId, force: bool) -> Result<Option<Vec<u8>>> {
        let started = self.data_source.generation();

        for _ in 0..=self.config.max_stale_retries {
            let (local, generation) = self.refresh_local().await?;

            let snapshot = self
                .state
                .lock()
                .await
                .peers
                .get(&peer)
                .cloned()
                .unwrap_or_else(|| PeerState::new(peer));

            let plan = self.plan(&snapshot, &local, force).await?;
            let bytes = plan.message.as_ref().map(SyncMessage::to_bytes).transpose()?;

            let mut state = self.state.lock().await;
            if self.data_source.generation() != generation {
                debug!(peer = %peer, "local store changed while planning, retrying");
                continue;
            }
            let peer_state = state
                .peers
                .entry(peer)
                .or_insert_with(|| PeerState::new(peer));
            if peer_state.revision != snapshot.revision {
                debug!(peer = %peer, "peer state changed while planning, retrying");
                continue;
            }

            if plan.message.is_some() {
                peer_state.last_sent_manifest_digest = Some(local.digest());
            }
            if let Some(pending) = peer_state
                .current_peer_manifest()
                .map(|peer_manifest| local.complement(peer_manifest).into_vector())
            {
                peer_state.pending_requests = pending;
            }
            peer_state.set_tier(plan.tier);
            peer_state.generation = generation;
            peer_state.revision += 1;

            if let Some(message) = &plan.message {
                debug!(peer = %peer, kind = ?message.kind(), "sending sync message");
            }
            return Ok(bytes);
        }

        Err(SyncError::Cancelled {
            started,
            current: self.data_source.generation(),
        })
    }

    async fn plan(&self, peer: &PeerState, local: &Manifest, force: bool) -> Result<Plan> {
        let local_digest = local.digest();

        if force || peer.tier() == Tier::Unknown {
            return Ok(Plan {
                message: Some(SyncMessage::manifest_digest(local)),
                tier: peer.tier().max(Tier::DigestExchanged),
            });
        }

        if let Some(peer_manifest) = peer.current_peer_manifest() {
            let missing = peer_manifest.complement(local);
            if !missing.is_empty() {
                let objects = self.collect_objects(&missing).await?;
                if !objects.is_empty() {
                    return Ok(Plan {
                        message: Some(SyncMessage::manifest_and_objects(local, &objects)),
                        tier: Tier::ManifestExchanged,
                    });
                }
            }
        }

        if peer.last_known_peer_manifest_digest() != Some(local_digest)
            || !peer.pending_requests().is_empty()
        {
            return Ok(Plan {
                message: Some(SyncMessage::manifest(local)),
                tier: Tier::ManifestExchanged,
            });
        }

        // The peer holds our manifest but may not know that we know.
        if peer.last_sent_manifest_digest() != Some(local_digest) {
            return Ok(Plan {
                message: Some(SyncMessage::manifest_digest(local)),
                tier: Tier::Synced,
            });
        }

        Ok(Plan {
            message: None,
            tier: Tier::Synced,
        })
    }

    /// Gather stored objects for `wanted`, up to the per-message cap.
    async fn collect_objects(&self, wanted: &Manifest) -> Result<Vec<Object>> {
        let limit = self
            .config
            .max_objects_per_message
            .clamp(1, limits::MAX_OBJECTS_PER_MESSAGE);

        let mut objects = Vec::new();
        let mut visitor = |_: &Digest, object: Option<&Object>| {
            if let Some(object) = object {
                objects.push(object.clone());
            }
            if objects.len() >= limit {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };
        self.data_source.for_each_object(wanted, &mut visitor).await?;
        Ok(objects)
    }

    /// Digest-only message for `peer`. Does not touch peer state.
    pub async fn create_manifest_digest_message(&self, peer: PeerId) -> Result<Vec<u8>> {
        let (local, _) = self.refresh_local().await?;
        debug!(peer = %peer, "building manifest digest message");
        SyncMessage::manifest_digest(&local).to_bytes()
    }

    /// Full manifest message for `peer`. Does not touch peer state.
    pub async fn create_manifest_message(&self, peer: PeerId) -> Result<Vec<u8>> {
        let (local, _) = self.refresh_local().await?;
        debug!(peer = %peer, "building manifest message");
        SyncMessage::manifest(&local).to_bytes()
    }

    /// Manifest plus the objects `peer` lacks, judged by its last known
    /// manifest (or everything, if none is known). Does not touch peer state.
    pub async fn create_manifest_and_objects_message(&self, peer: PeerId) -> Result<Vec<u8>> {
        let (local, _) = self.refresh_local().await?;
        let peer_manifest = self
            .state
            .lock()
            .await
            .peers
            .get(&peer)
            .and_then(|state| state.current_peer_manifest().cloned())
            .unwrap_or_else(Manifest::empty);

        let objects = self
            .collect_objects(&peer_manifest.complement(&local))
            .await?;
        debug!(peer = %peer, objects = objects.len(), "building manifest and objects message");
        SyncMessage::manifest_and_objects(&local, &objects).to_bytes()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Incoming
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply a message received from `peer`.
    ///
    /// Invalid messages fail with [`SyncError::InvalidMessage`] and leave
    /// both the store and the peer state untouched. A merge failure rolls
    /// back every object already applied from the message and fails with
    /// [`SyncError::Internal`]. Merged objects are also rolled back when the
    /// local manifest cannot be re-read afterwards, so a failed message never
    /// leaves objects behind.
    pub async fn handle_message(&self, peer: PeerId, bytes: &[u8]) -> Result<HandleReport> {
        let message = SyncMessage::from_bytes(bytes)
            .and_then(SyncMessage::decode)
            .map_err(|e| {
                warn!(peer = %peer, error = %e, "rejected sync message");
                e
            })?;

        let report = if message.manifest.is_none() {
            self.handle_digest(peer, message.digest).await?
        } else {
            self.handle_manifest(peer, message).await?
        };

        if report.applied {
            info!(
                peer = %peer,
                tier = ?report.tier,
                merged = report.merged,
                "applied sync message"
            );
        }
        Ok(report)
    }

    async fn handle_digest(&self, peer: PeerId, digest: Digest) -> Result<HandleReport> {
        let started = self.data_source.generation();

        for _ in 0..=self.config.max_stale_retries {
            let (local, generation) = self.refresh_local().await?;

            let mut state = self.state.lock().await;
            if self.data_source.generation() != generation {
                continue;
            }
            let peer_state = state
                .peers
                .entry(peer)
                .or_insert_with(|| PeerState::new(peer));

            let before = (peer_state.last_known_peer_manifest_digest, peer_state.tier);
            peer_state.record_peer_digest(digest);

            let matches = digest == local.digest();
            if matches {
                peer_state.pending_requests = Default::default();
            }
            let tier = match peer_state.tier {
                Tier::Unknown => Tier::DigestExchanged,
                _ if matches => Tier::Synced,
                Tier::Synced => Tier::ManifestExchanged,
                tier => tier,
            };
            peer_state.set_tier(tier);
            peer_state.generation = generation;

            let applied = before != (peer_state.last_known_peer_manifest_digest, peer_state.tier);
            if applied {
                peer_state.revision += 1;
            }

            return Ok(HandleReport {
                applied,
                tier,
                merged: 0,
                peer_missing: 0,
                still_needed: peer_state.pending_requests.len(),
            });
        }

        Err(SyncError::Cancelled {
            started,
            current: self.data_source.generation(),
        })
    }

    async fn handle_manifest(&self, peer: PeerId, message: DecodedMessage) -> Result<HandleReport> {
        let DecodedMessage {
            kind,
            manifest,
            objects,
            ..
        } = message;
        let incoming = manifest.unwrap_or_default();
        let started = self.data_source.generation();

        for _ in 0..=self.config.max_stale_retries {
            let (local, generation) = self.refresh_local().await?;
            let (_, only_peer) = local.diff(&incoming);

            let to_apply: Vec<Object> = objects
                .iter()
                .filter(|object| only_peer.contains(&object.digest()))
                .cloned()
                .collect();

            let mut merged = 0;
            let (local, generation) = if to_apply.is_empty() {
                (local, generation)
            } else {
                let _guard = self.apply_lock.lock().await;
                if self.data_source.generation() != generation {
                    continue;
                }
                let (count, backups) = self.apply_objects(peer, to_apply).await?;
                merged = count;
                match self.refresh_local().await {
                    Ok(refreshed) => refreshed,
                    Err(e) => {
                        warn!(
                            peer = %peer,
                            error = %e,
                            rolled_back = backups.len(),
                            "local manifest unavailable after merge, rolling back message"
                        );
                        self.rollback(backups).await?;
                        return Err(e);
                    }
                }
            };

            let mut state = self.state.lock().await;
            if merged == 0 && self.data_source.generation() != generation {
                continue;
            }
            let peer_state = state
                .peers
                .entry(peer)
                .or_insert_with(|| PeerState::new(peer));

            let before = (
                peer_state.last_known_peer_manifest_digest,
                peer_state.tier,
                peer_state.peer_manifest.is_some(),
            );

            peer_state.last_known_peer_manifest_digest = Some(incoming.digest());
            peer_state.pending_requests = local.complement(&incoming).into_vector();
            peer_state.peer_manifest = Some(incoming.clone());

            let tier = match kind {
                MessageKind::ManifestAndObjects if *local == incoming => Tier::Synced,
                _ => Tier::ManifestExchanged,
            };
            peer_state.set_tier(tier);
            peer_state.generation = generation;

            let applied = merged > 0
                || before
                    != (
                        peer_state.last_known_peer_manifest_digest,
                        peer_state.tier,
                        true,
                    );
            peer_state.revision += 1;

            return Ok(HandleReport {
                applied,
                tier,
                merged,
                peer_missing: incoming.complement(&local).count(),
                still_needed: peer_state.pending_requests.len(),
            });
        }

        Err(SyncError::Cancelled {
            started,
            current: self.data_source.generation(),
        })
    }

    /// Add every object or none of them. Returns how many changed the store,
    /// with the backups needed to undo the whole message.
    async fn apply_objects(
        &self,
        peer: PeerId,
        objects: Vec<Object>,
    ) -> Result<(usize, Vec<ObjectBackup>)> {
        let mut backups: Vec<ObjectBackup> = Vec::with_capacity(objects.len());
        let mut merged = 0;

        for object in objects {
            let digest = object.digest();
            let outcome = match self.backup_and_add(object, &mut backups).await {
                Ok(MergeResult::Failure(reason)) => Err(reason),
                Ok(result) => Ok(result),
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(MergeResult::LocalWins) => {}
                Ok(_) => merged += 1,
                Err(reason) => {
                    warn!(
                        peer = %peer,
                        object = %digest,
                        reason = %reason,
                        rolled_back = backups.len(),
                        "merge failed, rolling back message"
                    );
                    self.rollback(backups).await?;
                    return Err(SyncError::Internal(format!(
                        "merge of {} failed: {}",
                        digest, reason
                    )));
                }
            }
        }

        Ok((merged, backups))
    }

    async fn backup_and_add(
        &self,
        object: Object,
        backups: &mut Vec<ObjectBackup>,
    ) -> keysync_store::Result<MergeResult> {
        let key = self.data_source.copy_primary_key(&object)?;
        backups.push(self.data_source.backup_object(&key).await?);
        self.data_source.add(object).await
    }

    async fn rollback(&self, backups: Vec<ObjectBackup>) -> Result<()> {
        for backup in backups.into_iter().rev() {
            let key = backup.key;
            self.data_source.restore_object(backup).await.map_err(|e| {
                warn!(key = %key, error = %e, "rollback failed");
                SyncError::Internal(format!("rollback of {} failed: {}", key, e))
            })?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local manifest cache
    // ─────────────────────────────────────────────────────────────────────────

    /// Return the local manifest, re-copying it if the store's generation
    /// advanced. Synced peers evaluated at an older generation drop back to
    /// `ManifestExchanged`.
    async fn refresh_local(&self) -> Result<(Arc<Manifest>, u64)> {
        let started = self.data_source.generation();
        let mut generation = started;

        {
            let state = self.state.lock().await;
            if let Some(local) = state.local.as_ref().filter(|l| l.generation == generation) {
                return Ok((Arc::clone(&local.manifest), generation));
            }
        }

        for _ in 0..=self.config.max_stale_retries {
            let manifest = Arc::new(self.data_source.copy_manifest().await?);
            let current = self.data_source.generation();
            if current != generation {
                generation = current;
                continue;
            }

            let mut state = self.state.lock().await;
            let newer = state
                .local
                .as_ref()
                .map_or(true, |local| local.generation < generation);
            if newer {
                state.local = Some(LocalManifest {
                    manifest: Arc::clone(&manifest),
                    generation,
                });
                for peer in state.peers.values_mut() {
                    if peer.tier == Tier::Synced && peer.generation != generation {
                        peer.set_tier(Tier::ManifestExchanged);
                        peer.revision += 1;
                    }
                }
            }
            return Ok((manifest, generation));
        }

        Err(SyncError::Cancelled {
            started,
            current: generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use keysync_core::PropertyList;
    use keysync_store::merge::{FnPolicy, NewestWins};
    use keysync_store::{MemoryDataSource, MergeDecision, ObjectVisitor, PrimaryKey};

    use crate::messages::PROTOCOL_VERSION;

    fn item(account: &str, mdat: i64, data: &str) -> Object {
        Object::builder()
            .set("class", "genp")
            .set("acct", account)
            .set("mdat", mdat)
            .set("v_Data", data)
            .build()
    }

    fn store_with(objects: &[Object]) -> Arc<MemoryDataSource> {
        let store = MemoryDataSource::new(["class", "acct"], NewestWins::new("mdat"));
        for object in objects {
            store.insert(object.clone()).unwrap();
        }
        Arc::new(store)
    }

    fn peer() -> PeerId {
        PeerId::from_bytes([0xBB; 32])
    }

    fn decode(bytes: &[u8]) -> DecodedMessage {
        SyncMessage::from_bytes(bytes).unwrap().decode().unwrap()
    }

    /// Deliver messages back and forth until both engines go quiet.
    async fn converge<D: DataSource>(a: &SyncEngine<D>, b: &SyncEngine<D>) -> usize {
        let id_a = PeerId::from_bytes([0xAA; 32]);
        let id_b = PeerId::from_bytes([0xBB; 32]);

        for round in 0..20 {
            let to_b = a.sync_with_peer(id_b, false).await.unwrap();
            let to_a = b.sync_with_peer(id_a, false).await.unwrap();
            if to_a.is_none() && to_b.is_none() {
                return round;
            }
            if let Some(bytes) = to_b {
                b.handle_message(id_a, &bytes).await.unwrap();
            }
            if let Some(bytes) = to_a {
                a.handle_message(id_b, &bytes).await.unwrap();
            }
        }
        panic!("engines did not converge");
    }

    #[tokio::test]
    async fn test_unknown_peer_gets_digest() {
        let objects = [item("a", 1, "1"), item("b", 1, "2"), item("c", 1, "3")];
        let engine = SyncEngine::create(store_with(&objects));

        let bytes = engine.sync_with_peer(peer(), false).await.unwrap().unwrap();
        let message = decode(&bytes);
        assert_eq!(message.kind, MessageKind::ManifestDigest);
        assert_eq!(message.digest, engine.local_manifest().await.unwrap().digest());

        let state = engine.peer_state(&peer()).await.unwrap();
        assert_eq!(state.tier(), Tier::DigestExchanged);
        assert!(state.last_known_peer_manifest_digest().is_none());
    }

    #[tokio::test]
    async fn test_differing_digest_escalates_to_manifest() {
        let engine = SyncEngine::create(store_with(&[item("a", 1, "1")]));
        engine.sync_with_peer(peer(), false).await.unwrap();

        let other = Manifest::from_unsorted([Digest::hash(b"elsewhere")]);
        let digest = SyncMessage::manifest_digest(&other).to_bytes().unwrap();
        engine.handle_message(peer(), &digest).await.unwrap();

        let bytes = engine.sync_with_peer(peer(), false).await.unwrap().unwrap();
        assert_eq!(decode(&bytes).kind, MessageKind::Manifest);

        let state = engine.peer_state(&peer()).await.unwrap();
        assert_eq!(state.tier(), Tier::ManifestExchanged);
        assert_eq!(state.last_known_peer_manifest_digest(), Some(other.digest()));
    }

    #[tokio::test]
    async fn test_missing_object_is_sent_next_round() {
        let objects = [
            item("a", 1, "1"),
            item("b", 1, "2"),
            item("c", 1, "3"),
            item("d", 1, "4"),
        ];
        let engine = SyncEngine::create(store_with(&objects));
        engine.sync_with_peer(peer(), false).await.unwrap();

        let peer_manifest = Manifest::from_unsorted(objects[..3].iter().map(Object::digest));
        let message = SyncMessage::manifest(&peer_manifest).to_bytes().unwrap();
        let report = engine.handle_message(peer(), &message).await.unwrap();
        assert!(report.applied);
        assert_eq!(report.peer_missing, 1);
        assert_eq!(report.tier, Tier::ManifestExchanged);

        let bytes = engine.sync_with_peer(peer(), false).await.unwrap().unwrap();
        let message = decode(&bytes);
        assert_eq!(message.kind, MessageKind::ManifestAndObjects);
        assert_eq!(message.objects, vec![objects[3].clone()]);
    }

    #[tokio::test]
    async fn test_unsorted_manifest_rejected_without_state_change() {
        let engine = SyncEngine::create(store_with(&[item("a", 1, "1")]));
        engine.sync_with_peer(peer(), false).await.unwrap();
        let before = engine.peer_state(&peer()).await.unwrap();
        let generation = engine.generation();

        let (x, y) = (Digest::hash(b"x"), Digest::hash(b"y"));
        let (low, high) = if x < y { (x, y) } else { (y, x) };
        let mut manifest = high.0.to_vec();
        manifest.extend_from_slice(&low.0);
        let bytes = SyncMessage::Manifest {
            version: PROTOCOL_VERSION,
            manifest: Bytes::from(manifest),
        }
        .to_bytes()
        .unwrap();

        let err = engine.handle_message(peer(), &bytes).await.unwrap_err();
        assert!(err.is_invalid_message());

        let after = engine.peer_state(&peer()).await.unwrap();
        assert_eq!(after.tier(), before.tier());
        assert_eq!(
            after.last_known_peer_manifest_digest(),
            before.last_known_peer_manifest_digest()
        );
        assert_eq!(engine.generation(), generation);
    }

    #[tokio::test]
    async fn test_local_change_demotes_synced_peer() {
        let a = SyncEngine::create(store_with(&[item("a", 1, "1")]));
        let b = SyncEngine::create(store_with(&[item("b", 1, "2")]));
        converge(&a, &b).await;

        let id_b = PeerId::from_bytes([0xBB; 32]);
        assert_eq!(a.peer_state(&id_b).await.unwrap().tier(), Tier::Synced);

        a.data_source().insert(item("c", 1, "3")).unwrap();
        let bytes = a.sync_with_peer(id_b, false).await.unwrap();
        assert!(bytes.is_some());
        assert_eq!(
            a.peer_state(&id_b).await.unwrap().tier(),
            Tier::ManifestExchanged
        );
    }

    #[tokio::test]
    async fn test_synced_peer_stays_quiet() {
        let a = SyncEngine::create(store_with(&[item("a", 1, "1")]));
        let b = SyncEngine::create(store_with(&[item("a", 1, "1")]));
        converge(&a, &b).await;

        let id_b = PeerId::from_bytes([0xBB; 32]);
        assert!(a.sync_with_peer(id_b, false).await.unwrap().is_none());

        let forced = a.sync_with_peer(id_b, true).await.unwrap().unwrap();
        assert_eq!(decode(&forced).kind, MessageKind::ManifestDigest);
        assert_eq!(a.peer_state(&id_b).await.unwrap().tier(), Tier::Synced);
    }

    #[tokio::test]
    async fn test_two_engines_converge() {
        let a = SyncEngine::create(store_with(&[item("alice", 1, "a"), item("bob", 1, "b")]));
        let b = SyncEngine::create(store_with(&[item("carol", 1, "c")]));

        converge(&a, &b).await;

        let manifest_a = a.local_manifest().await.unwrap();
        let manifest_b = b.local_manifest().await.unwrap();
        assert_eq!(manifest_a, manifest_b);
        assert_eq!(manifest_a.count(), 3);
    }

    #[tokio::test]
    async fn test_conflict_resolves_to_newest() {
        let old = item("alice", 1, "old");
        let new = item("alice", 2, "new");
        let a = SyncEngine::create(store_with(&[old]));
        let b = SyncEngine::create(store_with(&[new.clone()]));

        converge(&a, &b).await;

        let expected = Manifest::from_unsorted([new.digest()]);
        assert_eq!(*a.local_manifest().await.unwrap(), expected);
        assert_eq!(*b.local_manifest().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_objects_capped_per_message() {
        let objects: Vec<Object> = (0..7).map(|i| item(&format!("acct{i}"), 1, "x")).collect();
        let config = EngineConfig {
            max_objects_per_message: 3,
            ..EngineConfig::default()
        };
        let engine = SyncEngine::new(store_with(&objects), config);
        engine.sync_with_peer(peer(), false).await.unwrap();

        let empty = SyncMessage::manifest(&Manifest::empty()).to_bytes().unwrap();
        engine.handle_message(peer(), &empty).await.unwrap();

        let bytes = engine.sync_with_peer(peer(), false).await.unwrap().unwrap();
        assert_eq!(decode(&bytes).objects.len(), 3);
    }

    #[tokio::test]
    async fn test_merge_failure_rolls_back_whole_message() {
        let reject_bob = FnPolicy(|_: &Object, peer: &Object| {
            if peer.get("acct").and_then(|v| v.as_text()) == Some("bob") {
                MergeDecision::Reject("bob is read-only".into())
            } else {
                MergeDecision::TakePeer
            }
        });
        let local = MemoryDataSource::new(["class", "acct"], reject_bob);
        local.insert(item("alice", 1, "old")).unwrap();
        local.insert(item("bob", 1, "old")).unwrap();
        let local = Arc::new(local);
        let engine = SyncEngine::create(Arc::clone(&local));

        let before = engine.local_manifest().await.unwrap();
        let generation = engine.generation();

        let incoming = [item("alice", 2, "new"), item("bob", 2, "new")];
        let manifest = Manifest::from_unsorted(incoming.iter().map(Object::digest));
        let bytes = SyncMessage::manifest_and_objects(&manifest, &incoming)
            .to_bytes()
            .unwrap();

        let err = engine.handle_message(peer(), &bytes).await.unwrap_err();
        assert!(matches!(err, SyncError::Internal(_)));

        let after = engine.local_manifest().await.unwrap();
        assert_eq!(after, before);
        assert!(engine.generation() > generation);
        assert!(engine.peer_state(&peer()).await.is_none());
    }

    #[tokio::test]
    async fn test_objects_already_held_are_ignored() {
        let shared = item("alice", 1, "a");
        let engine = SyncEngine::create(store_with(&[shared.clone()]));
        let generation = engine.generation();

        let manifest = Manifest::from_unsorted([shared.digest()]);
        let bytes = SyncMessage::manifest_and_objects(&manifest, &[shared])
            .to_bytes()
            .unwrap();
        let report = engine.handle_message(peer(), &bytes).await.unwrap();

        assert_eq!(report.merged, 0);
        assert_eq!(report.tier, Tier::Synced);
        assert_eq!(engine.generation(), generation);
    }

    #[tokio::test]
    async fn test_create_helpers_do_not_touch_state() {
        let engine = SyncEngine::create(store_with(&[item("a", 1, "1")]));

        let digest = engine.create_manifest_digest_message(peer()).await.unwrap();
        let manifest = engine.create_manifest_message(peer()).await.unwrap();
        let objects = engine
            .create_manifest_and_objects_message(peer())
            .await
            .unwrap();

        assert_eq!(decode(&digest).kind, MessageKind::ManifestDigest);
        assert_eq!(decode(&manifest).kind, MessageKind::Manifest);
        assert_eq!(decode(&objects).objects.len(), 1);
        assert!(engine.peer_state(&peer()).await.is_none());
    }

    #[tokio::test]
    async fn test_forget_peer_resets_to_unknown() {
        let engine = SyncEngine::create(store_with(&[item("a", 1, "1")]));
        engine.sync_with_peer(peer(), false).await.unwrap();
        assert_eq!(engine.peers().await.len(), 1);

        assert!(engine.forget_peer(&peer()).await);
        assert!(!engine.forget_peer(&peer()).await);

        let bytes = engine.sync_with_peer(peer(), false).await.unwrap().unwrap();
        assert_eq!(decode(&bytes).kind, MessageKind::ManifestDigest);
    }

    /// A store whose generation moves on every read once it stops being
    /// calm: after a number of steady reads, or after the first add.
    struct ChurningSource {
        inner: MemoryDataSource,
        ticks: AtomicU64,
        calm_reads: AtomicU64,
        churn_on_add: bool,
    }

    impl ChurningSource {
        fn new(calm_reads: u64, churn_on_add: bool) -> Self {
            Self {
                inner: MemoryDataSource::new(["acct"], NewestWins::new("mdat")),
                ticks: AtomicU64::new(1_000),
                calm_reads: AtomicU64::new(calm_reads),
                churn_on_add,
            }
        }

        fn always() -> Self {
            Self::new(0, false)
        }

        fn after_reads(calm_reads: u64) -> Self {
            Self::new(calm_reads, false)
        }

        fn after_first_add() -> Self {
            Self::new(u64::MAX, true)
        }
    }

    #[async_trait]
    impl DataSource for ChurningSource {
        fn generation(&self) -> u64 {
            let calm = self
                .calm_reads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if calm {
                self.inner.generation()
            } else {
                self.ticks.fetch_add(1, Ordering::SeqCst)
            }
        }

        async fn manifest_digest(&self) -> keysync_store::Result<Digest> {
            self.inner.manifest_digest().await
        }

        async fn copy_manifest(&self) -> keysync_store::Result<Manifest> {
            self.inner.copy_manifest().await
        }

        async fn for_each_object(
            &self,
            manifest: &Manifest,
            visitor: &mut ObjectVisitor<'_>,
        ) -> keysync_store::Result<()> {
            self.inner.for_each_object(manifest, visitor).await
        }

        async fn add(&self, object: Object) -> keysync_store::Result<MergeResult> {
            let result = self.inner.add(object).await;
            if self.churn_on_add {
                self.calm_reads.store(0, Ordering::SeqCst);
            }
            result
        }

        fn create_with_property_list(
            &self,
            properties: PropertyList,
        ) -> keysync_store::Result<Object> {
            self.inner.create_with_property_list(properties)
        }

        fn copy_primary_key(&self, object: &Object) -> keysync_store::Result<PrimaryKey> {
            self.inner.copy_primary_key(object)
        }

        fn copy_merged_object(
            &self,
            local: &Object,
            peer: &Object,
        ) -> keysync_store::Result<Object> {
            self.inner.copy_merged_object(local, peer)
        }

        async fn backup_object(&self, key: &PrimaryKey) -> keysync_store::Result<ObjectBackup> {
            self.inner.backup_object(key).await
        }

        async fn restore_object(&self, backup: ObjectBackup) -> keysync_store::Result<()> {
            self.inner.restore_object(backup).await
        }
    }

    #[tokio::test]
    async fn test_sync_cancelled_when_store_keeps_changing() {
        let engine = SyncEngine::create(Arc::new(ChurningSource::always()));

        let err = engine.sync_with_peer(peer(), false).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled { .. }));
        assert!(engine.peer_state(&peer()).await.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_sync_leaves_no_peer_behind() {
        // Steady long enough to snapshot the manifest and plan, then moves
        // before the commit.
        let engine = SyncEngine::create(Arc::new(ChurningSource::after_reads(3)));

        let err = engine.sync_with_peer(peer(), false).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled { .. }));
        assert!(engine.peer_state(&peer()).await.is_none());
        assert!(engine.peers().await.is_empty());
    }

    #[tokio::test]
    async fn test_merged_objects_rolled_back_when_store_churns_after_add() {
        let engine = SyncEngine::create(Arc::new(ChurningSource::after_first_add()));
        let incoming = item("alice", 1, "a");
        let manifest = Manifest::from_unsorted([incoming.digest()]);
        let bytes = SyncMessage::manifest_and_objects(&manifest, &[incoming.clone()])
            .to_bytes()
            .unwrap();

        let err = engine.handle_message(peer(), &bytes).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled { .. }));

        let store = &engine.data_source().inner;
        assert!(store.get(&incoming.digest()).unwrap().is_none());
        assert!(store.is_empty().unwrap());
        assert!(engine.peer_state(&peer()).await.is_none());
    }

    #[tokio::test]
    async fn test_matching_digest_from_unknown_peer_is_digest_exchanged() {
        let engine = SyncEngine::create(store_with(&[item("a", 1, "1")]));
        let local = engine.local_manifest().await.unwrap();
        let digest = SyncMessage::manifest_digest(&local).to_bytes().unwrap();

        let first = engine.handle_message(peer(), &digest).await.unwrap();
        assert_eq!(first.tier, Tier::DigestExchanged);

        let second = engine.handle_message(peer(), &digest).await.unwrap();
        assert_eq!(second.tier, Tier::Synced);
    }
}

//! DataSource trait: the object store contract consumed by the sync engine.
//!
//! The engine never owns objects. It asks the data source for its manifest,
//! for the objects behind a set of digests, and hands it objects received
//! from peers to merge.

use std::fmt;
use std::ops::ControlFlow;

use async_trait::async_trait;
use keysync_core::{Digest, Manifest, Object, PropertyList};

use crate::error::Result;

/// Identity of an object independent of its content.
///
/// Two objects with the same primary key are versions of the same record;
/// adding one while the other is stored is a merge conflict.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrimaryKey(pub Digest);

impl fmt::Debug for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrimaryKey({})", self.0)
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of adding a peer's object to a data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    /// The local copy was kept; the peer's object was discarded.
    LocalWins,
    /// The peer's object is now stored (replacing any local copy).
    PeersWins,
    /// A new object combining both copies was created and stored.
    CreatedMerged,
    /// The objects could not be reconciled.
    Failure(String),
}

impl MergeResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, MergeResult::Failure(_))
    }
}

/// Snapshot of whatever was stored under a primary key.
///
/// `object` is `None` when nothing was stored; restoring such a backup
/// removes the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectBackup {
    pub key: PrimaryKey,
    pub object: Option<Object>,
}

/// Visitor over `(digest, stored object)` pairs; break to stop early.
pub type ObjectVisitor<'a> = dyn FnMut(&Digest, Option<&Object>) -> ControlFlow<()> + Send + 'a;

/// The DataSource trait: async interface for the synchronized object store.
///
/// # Design Notes
///
/// - **Generations**: `generation()` strictly increases on every mutation,
///   including merges and restores. The engine uses it to detect that a
///   cached manifest is stale.
/// - **Serialization**: a data source is assumed single-writer from the
///   engine's point of view. Sharing one between engines needs external
///   coordination.
#[async_trait]
pub trait DataSource: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Manifest Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Current mutation counter.
    fn generation(&self) -> u64;

    /// Digest of the current manifest.
    async fn manifest_digest(&self) -> Result<Digest>;

    /// Snapshot of the current manifest.
    async fn copy_manifest(&self) -> Result<Manifest>;

    /// Visit every digest of `manifest` in ascending order together with the
    /// stored object, or `None` if the store does not hold it.
    async fn for_each_object(
        &self,
        manifest: &Manifest,
        visitor: &mut ObjectVisitor<'_>,
    ) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Object Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Add an object received from a peer, merging with any local object
    /// that shares its primary key.
    async fn add(&self, object: Object) -> Result<MergeResult>;

    /// Build an object from attributes, validating it for this store.
    fn create_with_property_list(&self, properties: PropertyList) -> Result<Object>;

    fn copy_digest(&self, object: &Object) -> Digest {
        object.digest()
    }

    fn copy_primary_key(&self, object: &Object) -> Result<PrimaryKey>;

    fn copy_property_list(&self, object: &Object) -> PropertyList {
        object.properties().clone()
    }

    /// The object that should be stored when `local` and `peer` conflict.
    fn copy_merged_object(&self, local: &Object, peer: &Object) -> Result<Object>;

    // ─────────────────────────────────────────────────────────────────────────
    // Rollback Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Snapshot what is stored under `key`.
    async fn backup_object(&self, key: &PrimaryKey) -> Result<ObjectBackup>;

    /// Put a snapshot back, replacing whatever is stored under its key.
    async fn restore_object(&self, backup: ObjectBackup) -> Result<()>;
}

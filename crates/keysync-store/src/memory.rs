//! In-memory implementation of the DataSource trait.
//!
//! Keeps every object in memory with no persistence. The manifest is
//! maintained incrementally by patching it on each mutation rather than
//! being rebuilt from the object table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use keysync_core::{encode_property_list, Digest, Manifest, Object, PropertyList};

use crate::error::{Result, StoreError};
use crate::merge::{MergeDecision, MergePolicy};
use crate::traits::{DataSource, MergeResult, ObjectBackup, ObjectVisitor, PrimaryKey};

/// In-memory data source.
///
/// Objects are identified by the attributes named at construction. With no
/// primary key attributes, an object's key is its content digest and
/// conflicts never arise. Thread-safe via RwLock.
pub struct MemoryDataSource {
    primary_key_attributes: Vec<String>,
    policy: Box<dyn MergePolicy>,
    generation: AtomicU64,
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    /// Objects indexed by digest.
    objects: HashMap<Digest, Object>,

    /// Primary key -> digest of the stored version.
    keys: HashMap<PrimaryKey, Digest>,

    /// Digests of all stored objects.
    manifest: Manifest,
}

impl MemoryInner {
    /// Replace whatever is stored under `key` with `object` (or nothing).
    fn replace(&mut self, key: PrimaryKey, object: Option<Object>) -> Result<Option<Object>> {
        let previous = match self.keys.remove(&key) {
            Some(digest) => self.objects.remove(&digest),
            None => None,
        };

        let removals: Vec<Digest> = previous.iter().map(Object::digest).collect();
        let additions: Vec<Digest> = object.iter().map(Object::digest).collect();
        self.manifest = self.manifest.patch(
            &Manifest::from_digests(removals)?,
            &Manifest::from_digests(additions)?,
        )?;

        if let Some(object) = object {
            self.keys.insert(key, object.digest());
            self.objects.insert(object.digest(), object);
        }

        Ok(previous)
    }
}

impl MemoryDataSource {
    /// Create an empty store keyed by `primary_key_attributes`, resolving
    /// conflicts with `policy`.
    pub fn new<I, S>(primary_key_attributes: I, policy: impl MergePolicy + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            primary_key_attributes: primary_key_attributes.into_iter().map(Into::into).collect(),
            policy: Box::new(policy),
            generation: AtomicU64::new(0),
            inner: RwLock::new(MemoryInner::default()),
        }
    }

    /// Store a locally created object, replacing any version with the same
    /// primary key. Returns the replaced version.
    pub fn insert(&self, object: Object) -> Result<Option<Object>> {
        let key = self.primary_key(&object)?;
        let mut inner = self.write()?;
        if inner.objects.contains_key(&object.digest()) {
            return Ok(None);
        }
        let previous = inner.replace(key, Some(object))?;
        self.bump();
        Ok(previous)
    }

    /// Remove the object stored under `key`.
    pub fn remove(&self, key: &PrimaryKey) -> Result<Option<Object>> {
        let mut inner = self.write()?;
        if !inner.keys.contains_key(key) {
            return Ok(None);
        }
        let previous = inner.replace(*key, None)?;
        self.bump();
        Ok(previous)
    }

    /// Get an object by digest.
    pub fn get(&self, digest: &Digest) -> Result<Option<Object>> {
        Ok(self.read()?.objects.get(digest).cloned())
    }

    /// Get the version stored under a primary key.
    pub fn get_by_key(&self, key: &PrimaryKey) -> Result<Option<Object>> {
        let inner = self.read()?;
        Ok(inner
            .keys
            .get(key)
            .and_then(|digest| inner.objects.get(digest))
            .cloned())
    }

    /// Number of stored objects.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.objects.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn primary_key(&self, object: &Object) -> Result<PrimaryKey> {
        if self.primary_key_attributes.is_empty() {
            return Ok(PrimaryKey(object.digest()));
        }

        let mut subset = PropertyList::new();
        for attribute in &self.primary_key_attributes {
            let value = object
                .get(attribute)
                .ok_or_else(|| StoreError::MissingAttribute(attribute.clone()))?;
            subset.insert(attribute.clone(), value.clone());
        }
        Ok(PrimaryKey(Digest::hash(&encode_property_list(&subset))))
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryInner>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryInner>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn manifest_digest(&self) -> Result<Digest> {
        Ok(self.read()?.manifest.digest())
    }

    async fn copy_manifest(&self) -> Result<Manifest> {
        Ok(self.read()?.manifest.clone())
    }

    async fn for_each_object(
        &self,
        manifest: &Manifest,
        visitor: &mut ObjectVisitor<'_>,
    ) -> Result<()> {
        let inner = self.read()?;
        for digest in manifest {
            if visitor(digest, inner.objects.get(digest)).is_break() {
                break;
            }
        }
        Ok(())
    }

    async fn add(&self, object: Object) -> Result<MergeResult> {
        let key = self.primary_key(&object)?;
        let mut inner = self.write()?;

        if inner.objects.contains_key(&object.digest()) {
            return Ok(MergeResult::LocalWins);
        }

        let stored = inner
            .keys
            .get(&key)
            .and_then(|digest| inner.objects.get(digest))
            .cloned();
        let local = match stored {
            Some(local) => local,
            None => {
                inner.replace(key, Some(object))?;
                self.bump();
                return Ok(MergeResult::PeersWins);
            }
        };

        let result = match self.policy.merge(&local, &object) {
            MergeDecision::KeepLocal => MergeResult::LocalWins,
            MergeDecision::TakePeer => {
                inner.replace(key, Some(object))?;
                self.bump();
                MergeResult::PeersWins
            }
            MergeDecision::Merged(merged) => {
                if self.primary_key(&merged)? != key {
                    return Ok(MergeResult::Failure(
                        "merged object changed the primary key".into(),
                    ));
                }
                if merged.digest() == local.digest() {
                    MergeResult::LocalWins
                } else {
                    let result = if merged.digest() == object.digest() {
                        MergeResult::PeersWins
                    } else {
                        MergeResult::CreatedMerged
                    };
                    inner.replace(key, Some(merged))?;
                    self.bump();
                    result
                }
            }
            MergeDecision::Reject(reason) => MergeResult::Failure(reason),
        };

        tracing::debug!(key = %key, result = ?result, "resolved object conflict");
        Ok(result)
    }

    fn create_with_property_list(&self, properties: PropertyList) -> Result<Object> {
        let object = Object::new(properties);
        self.primary_key(&object)?;
        Ok(object)
    }

    fn copy_primary_key(&self, object: &Object) -> Result<PrimaryKey> {
        self.primary_key(object)
    }

    fn copy_merged_object(&self, local: &Object, peer: &Object) -> Result<Object> {
        match self.policy.merge(local, peer) {
            MergeDecision::KeepLocal => Ok(local.clone()),
            MergeDecision::TakePeer => Ok(peer.clone()),
            MergeDecision::Merged(merged) => Ok(merged),
            MergeDecision::Reject(reason) => Err(StoreError::MergeFailed(reason)),
        }
    }

    async fn backup_object(&self, key: &PrimaryKey) -> Result<ObjectBackup> {
        Ok(ObjectBackup {
            key: *key,
            object: self.get_by_key(key)?,
        })
    }

    async fn restore_object(&self, backup: ObjectBackup) -> Result<()> {
        let mut inner = self.write()?;

        let current = inner.keys.get(&backup.key).copied();
        if current == backup.object.as_ref().map(Object::digest) {
            return Ok(());
        }

        inner.replace(backup.key, backup.object)?;
        self.bump();
        Ok(())
    }
}

//! Manifests: immutable digest sets describing a store snapshot.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::OnceLock;

use crate::digest::{Digest, DigestHasher};
use crate::error::Result;
use crate::vector::DigestVector;

/// An immutable, value-semantic set of digests.
///
/// The self-digest is the [`Digest`] of the serialized vector (the ascending
/// concatenation of its members). It is computed on first use and cached, so
/// two manifests with the same members always report the same digest no
/// matter how they were built.
#[derive(Clone, Default)]
pub struct Manifest {
    vector: DigestVector,
    digest: OnceLock<Digest>,
}

impl Manifest {
    /// Wrap a digest vector.
    pub fn create(vector: DigestVector) -> Self {
        Self {
            vector,
            digest: OnceLock::new(),
        }
    }

    /// The manifest with no members.
    pub fn empty() -> Self {
        Self::create(DigestVector::new())
    }

    /// Build from digests that are already strictly ascending.
    pub fn from_digests(digests: Vec<Digest>) -> Result<Self> {
        DigestVector::from_digests(digests).map(Self::create)
    }

    /// Build from arbitrary digests, sorting and deduplicating them.
    pub fn from_unsorted<I>(digests: I) -> Self
    where
        I: IntoIterator<Item = Digest>,
    {
        Self::create(DigestVector::from_unsorted(digests))
    }

    /// Decode from serialized bytes, re-verifying the ordering invariant.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        DigestVector::from_bytes(bytes).map(Self::create)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.vector.to_bytes()
    }

    /// The self-digest of this manifest.
    pub fn digest(&self) -> Digest {
        *self.digest.get_or_init(|| {
            let mut hasher = DigestHasher::new();
            for member in &self.vector {
                hasher.update(member.as_bytes());
            }
            hasher.finalize()
        })
    }

    pub fn count(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.vector.contains(digest)
    }

    /// Members in ascending order.
    pub fn iter(&self) -> std::slice::Iter<'_, Digest> {
        self.vector.iter()
    }

    /// Visit members in ascending order until the visitor breaks.
    ///
    /// Returns `Break` if the visitor stopped early.
    pub fn for_each<F>(&self, mut visitor: F) -> ControlFlow<()>
    where
        F: FnMut(&Digest) -> ControlFlow<()>,
    {
        for member in &self.vector {
            if visitor(member).is_break() {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    pub fn vector(&self) -> &DigestVector {
        &self.vector
    }

    pub fn into_vector(self) -> DigestVector {
        self.vector
    }

    /// `(only in self, only in other)`.
    pub fn diff(&self, other: &Self) -> (Self, Self) {
        let (left, right) = self.vector.diff(&other.vector);
        (Self::create(left), Self::create(right))
    }

    /// The members of `other` that `self` lacks.
    pub fn complement(&self, other: &Self) -> Self {
        Self::create(self.vector.complement(&other.vector))
    }

    pub fn intersection(&self, other: &Self) -> Self {
        Self::create(self.vector.intersection(&other.vector))
    }

    pub fn union(&self, other: &Self) -> Self {
        Self::create(self.vector.union(&other.vector))
    }

    pub fn patch(&self, removals: &Self, additions: &Self) -> Result<Self> {
        self.vector
            .patch(&removals.vector, &additions.vector)
            .map(Self::create)
    }
}

impl PartialEq for Manifest {
    fn eq(&self, other: &Self) -> bool {
        self.vector == other.vector
    }
}

impl Eq for Manifest {}

impl fmt::Debug for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manifest")
            .field("count", &self.count())
            .field("digest", &self.digest())
            .finish()
    }
}

impl From<DigestVector> for Manifest {
    fn from(vector: DigestVector) -> Self {
        Self::create(vector)
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a Digest;
    type IntoIter = std::slice::Iter<'a, Digest>;

    fn into_iter(self) -> Self::IntoIter {
        self.vector.iter()
    }
}

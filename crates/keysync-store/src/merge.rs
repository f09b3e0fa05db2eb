//! Merge policies for objects that share a primary key.
//!
//! No policy is the default. A store must be given one explicitly, because
//! which copy should survive a concurrent edit depends on what the objects
//! mean.

use std::cmp::Ordering;

use keysync_core::Object;

/// What to do when a peer's object conflicts with the local one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    KeepLocal,
    TakePeer,
    /// Store this new object instead of either input.
    Merged(Object),
    /// Refuse to reconcile; the add fails.
    Reject(String),
}

/// Conflict resolution between two versions of the same record.
pub trait MergePolicy: Send + Sync {
    fn merge(&self, local: &Object, peer: &Object) -> MergeDecision;
}

/// Always keep the local copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepLocal;

impl MergePolicy for KeepLocal {
    fn merge(&self, _local: &Object, _peer: &Object) -> MergeDecision {
        MergeDecision::KeepLocal
    }
}

/// Always take the peer's copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct TakePeer;

impl MergePolicy for TakePeer {
    fn merge(&self, _local: &Object, _peer: &Object) -> MergeDecision {
        MergeDecision::TakePeer
    }
}

/// Keep whichever copy has the larger integer `attribute` (for example a
/// modification timestamp).
///
/// Ties, and copies missing the attribute, fall back to the larger digest so
/// both sides of a sync pick the same winner.
#[derive(Debug, Clone)]
pub struct NewestWins {
    pub attribute: String,
}

impl NewestWins {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
        }
    }
}

impl MergePolicy for NewestWins {
    fn merge(&self, local: &Object, peer: &Object) -> MergeDecision {
        let stamp = |object: &Object| object.get(&self.attribute).and_then(|v| v.as_integer());

        let ordering = stamp(local)
            .cmp(&stamp(peer))
            .then_with(|| local.digest().cmp(&peer.digest()));

        match ordering {
            Ordering::Less => MergeDecision::TakePeer,
            Ordering::Equal | Ordering::Greater => MergeDecision::KeepLocal,
        }
    }
}

/// Adapter turning a closure into a [`MergePolicy`].
pub struct FnPolicy<F>(pub F);

impl<F> MergePolicy for FnPolicy<F>
where
    F: Fn(&Object, &Object) -> MergeDecision + Send + Sync,
{
    fn merge(&self, local: &Object, peer: &Object) -> MergeDecision {
        (self.0)(local, peer)
    }
}

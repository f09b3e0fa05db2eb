//! Sorted digest vectors and their set algebra.
//!
//! A [`DigestVector`] is strictly ascending and duplicate-free. The only way to
//! obtain one is through a validating constructor or as the output of one of
//! the set operations below, each of which is a single merge-scan over two
//! sorted inputs in `O(|a| + |b|)`.

use std::cmp::Ordering;

use crate::digest::{Digest, DIGEST_SIZE};
use crate::error::{CoreError, Result};

/// A strictly ascending, duplicate-free sequence of digests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DigestVector {
    digests: Vec<Digest>,
}

/// Which input(s) a digest was found in during a merge-scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
    Both,
}

impl DigestVector {
    /// The empty vector.
    pub const fn new() -> Self {
        Self {
            digests: Vec::new(),
        }
    }

    /// Wrap digests that are already strictly ascending.
    ///
    /// Input that is out of order or contains duplicates is refused with
    /// [`CoreError::Create`]; it is never sorted on the caller's behalf.
    pub fn from_digests(digests: Vec<Digest>) -> Result<Self> {
        if let Some(index) = first_unordered(&digests) {
            return Err(CoreError::Create(format!(
                "digests not strictly ascending at index {}",
                index
            )));
        }
        Ok(Self { digests })
    }

    /// Sort and deduplicate arbitrary digests.
    pub fn from_unsorted<I>(digests: I) -> Self
    where
        I: IntoIterator<Item = Digest>,
    {
        let mut digests: Vec<Digest> = digests.into_iter().collect();
        digests.sort_unstable();
        digests.dedup();
        Self { digests }
    }

    /// Decode a concatenation of digests.
    ///
    /// The buffer must be an exact multiple of [`DIGEST_SIZE`]
    /// ([`CoreError::Create`] otherwise) and the decoded digests must be
    /// strictly ascending ([`CoreError::Unsorted`] otherwise).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % DIGEST_SIZE != 0 {
            return Err(CoreError::Create(format!(
                "buffer length {} is not a multiple of {}",
                bytes.len(),
                DIGEST_SIZE
            )));
        }

        let digests: Vec<Digest> = bytes
            .chunks_exact(DIGEST_SIZE)
            .map(|chunk| {
                let mut arr = [0u8; DIGEST_SIZE];
                arr.copy_from_slice(chunk);
                Digest(arr)
            })
            .collect();

        if let Some(index) = first_unordered(&digests) {
            return Err(CoreError::Unsorted { index });
        }
        Ok(Self { digests })
    }

    /// Serialize as the concatenation of all digests in ascending order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.digests.len() * DIGEST_SIZE);
        for digest in &self.digests {
            buf.extend_from_slice(&digest.0);
        }
        buf
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Membership test by binary search.
    pub fn contains(&self, digest: &Digest) -> bool {
        self.digests.binary_search(digest).is_ok()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Digest> {
        self.digests.iter()
    }

    pub fn as_slice(&self) -> &[Digest] {
        &self.digests
    }

    pub fn into_vec(self) -> Vec<Digest> {
        self.digests
    }

    /// Partition the symmetric difference: `(only in self, only in other)`.
    pub fn diff(&self, other: &Self) -> (Self, Self) {
        let mut only_left = Vec::new();
        let mut only_right = Vec::new();
        merge_scan(&self.digests, &other.digests, |side, digest| match side {
            Side::Left => only_left.push(digest),
            Side::Right => only_right.push(digest),
            Side::Both => {}
        });
        (
            Self { digests: only_left },
            Self {
                digests: only_right,
            },
        )
    }

    /// Relative complement `other \ self`: the digests of `other` missing from `self`.
    pub fn complement(&self, other: &Self) -> Self {
        let mut digests = Vec::new();
        merge_scan(&self.digests, &other.digests, |side, digest| {
            if side == Side::Right {
                digests.push(digest);
            }
        });
        Self { digests }
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let mut digests = Vec::new();
        merge_scan(&self.digests, &other.digests, |side, digest| {
            if side == Side::Both {
                digests.push(digest);
            }
        });
        Self { digests }
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut digests = Vec::with_capacity(self.len().max(other.len()));
        merge_scan(&self.digests, &other.digests, |_, digest| digests.push(digest));
        Self { digests }
    }

    /// Apply `removals` then `additions` to `self`.
    ///
    /// `removals` must be a subset of `self`, and `additions` must not
    /// intersect what remains after the removals.
    pub fn patch(&self, removals: &Self, additions: &Self) -> Result<Self> {
        if !removals.is_subset_of(self) {
            return Err(CoreError::Create(
                "patch removals are not a subset of the base".into(),
            ));
        }

        let retained = removals.complement(self);
        if !retained.is_disjoint_from(additions) {
            return Err(CoreError::Create(
                "patch additions intersect the retained base".into(),
            ));
        }

        Ok(retained.union(additions))
    }

    pub fn is_subset_of(&self, other: &Self) -> bool {
        let mut subset = true;
        merge_scan(&self.digests, &other.digests, |side, _| {
            if side == Side::Left {
                subset = false;
            }
        });
        subset
    }

    pub fn is_disjoint_from(&self, other: &Self) -> bool {
        let mut disjoint = true;
        merge_scan(&self.digests, &other.digests, |side, _| {
            if side == Side::Both {
                disjoint = false;
            }
        });
        disjoint
    }
}

impl<'a> IntoIterator for &'a DigestVector {
    type Item = &'a Digest;
    type IntoIter = std::slice::Iter<'a, Digest>;

    fn into_iter(self) -> Self::IntoIter {
        self.digests.iter()
    }
}

/// Walk two ascending slices in lockstep, reporting every distinct digest once.
fn merge_scan(left: &[Digest], right: &[Digest], mut visit: impl FnMut(Side, Digest)) {
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match left[i].cmp(&right[j]) {
            Ordering::Less => {
                visit(Side::Left, left[i]);
                i += 1;
            }
            Ordering::Greater => {
                visit(Side::Right, right[j]);
                j += 1;
            }
            Ordering::Equal => {
                visit(Side::Both, left[i]);
                i += 1;
                j += 1;
            }
        }
    }
    for digest in &left[i..] {
        visit(Side::Left, *digest);
    }
    for digest in &right[j..] {
        visit(Side::Right, *digest);
    }
}

/// Index of the first digest that is not greater than its predecessor.
fn first_unordered(digests: &[Digest]) -> Option<usize> {
    digests
        .windows(2)
        .position(|pair| pair[0] >= pair[1])
        .map(|i| i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn d(n: u8) -> Digest {
        let mut bytes = [0u8; DIGEST_SIZE];
        bytes[0] = n;
        Digest(bytes)
    }

    fn vector(ns: &[u8]) -> DigestVector {
        DigestVector::from_digests(ns.iter().map(|n| d(*n)).collect()).unwrap()
    }

    fn digest_set() -> impl Strategy<Value = DigestVector> {
        prop::collection::vec(any::<u8>(), 0..64)
            .prop_map(|ns| DigestVector::from_unsorted(ns.into_iter().map(d)))
    }

    #[test]
    fn test_from_digests_rejects_unsorted() {
        let err = DigestVector::from_digests(vec![d(2), d(1)]).unwrap_err();
        assert!(matches!(err, CoreError::Create(_)));
    }

    #[test]
    fn test_from_digests_rejects_duplicates() {
        let err = DigestVector::from_digests(vec![d(1), d(1)]).unwrap_err();
        assert!(matches!(err, CoreError::Create(_)));
    }

    #[test]
    fn test_from_bytes_wrong_length() {
        let err = DigestVector::from_bytes(&[0u8; DIGEST_SIZE + 1]).unwrap_err();
        assert!(matches!(err, CoreError::Create(_)));
    }

    #[test]
    fn test_from_bytes_unsorted() {
        let mut bytes = d(3).0.to_vec();
        bytes.extend_from_slice(&d(1).0);
        let err = DigestVector::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, CoreError::Unsorted { index: 1 }));
    }

    #[test]
    fn test_from_bytes_empty() {
        let v = DigestVector::from_bytes(&[]).unwrap();
        assert!(v.is_empty());
    }

    #[test]
    fn test_from_unsorted_sorts_and_dedups() {
        let v = DigestVector::from_unsorted(vec![d(3), d(1), d(3), d(2)]);
        assert_eq!(v, vector(&[1, 2, 3]));
    }

    #[test]
    fn test_diff_partitions() {
        let a = vector(&[1, 2, 3, 5]);
        let b = vector(&[2, 4, 5, 6]);
        let (only_a, only_b) = a.diff(&b);
        assert_eq!(only_a, vector(&[1, 3]));
        assert_eq!(only_b, vector(&[4, 6]));
    }

    #[test]
    fn test_complement_is_directional() {
        let a = vector(&[1, 2]);
        let b = vector(&[2, 3]);
        assert_eq!(a.complement(&b), vector(&[3]));
        assert_eq!(b.complement(&a), vector(&[1]));
    }

    #[test]
    fn test_contains() {
        let v = vector(&[1, 5, 9]);
        assert!(v.contains(&d(5)));
        assert!(!v.contains(&d(4)));
    }

    #[test]
    fn test_patch() {
        let base = vector(&[1, 2, 3]);
        let result = base.patch(&vector(&[2]), &vector(&[4])).unwrap();
        assert_eq!(result, vector(&[1, 3, 4]));
    }

    #[test]
    fn test_patch_removal_not_in_base() {
        let base = vector(&[1, 2, 3]);
        let err = base.patch(&vector(&[7]), &vector(&[])).unwrap_err();
        assert!(matches!(err, CoreError::Create(_)));
    }

    #[test]
    fn test_patch_addition_already_present() {
        let base = vector(&[1, 2, 3]);
        let err = base.patch(&vector(&[1]), &vector(&[2])).unwrap_err();
        assert!(matches!(err, CoreError::Create(_)));

        // Re-adding something that is being removed is allowed.
        let readded = base.patch(&vector(&[2]), &vector(&[2])).unwrap();
        assert_eq!(readded, base);
    }

    proptest! {
        #[test]
        fn prop_diff_reconstructs_inputs(a in digest_set(), b in digest_set()) {
            let (only_a, only_b) = a.diff(&b);
            let common = a.intersection(&b);
            prop_assert_eq!(only_a.union(&common), a.clone());
            prop_assert_eq!(only_b.union(&common), b.clone());
        }

        #[test]
        fn prop_diff_with_self_is_empty(a in digest_set()) {
            let (only_a, only_b) = a.diff(&a);
            prop_assert!(only_a.is_empty());
            prop_assert!(only_b.is_empty());
        }

        #[test]
        fn prop_complement_is_right_half_of_diff(a in digest_set(), b in digest_set()) {
            prop_assert_eq!(a.complement(&b), a.diff(&b).1);
        }

        #[test]
        fn prop_union_and_intersection_commute(a in digest_set(), b in digest_set()) {
            prop_assert_eq!(a.union(&b), b.union(&a));
            prop_assert_eq!(a.intersection(&b), b.intersection(&a));
            prop_assert_eq!(a.union(&a), a.clone());
            prop_assert_eq!(a.intersection(&a), a.clone());
        }

        #[test]
        fn prop_bytes_roundtrip(a in digest_set()) {
            prop_assert_eq!(DigestVector::from_bytes(&a.to_bytes()).unwrap(), a);
        }

        #[test]
        fn prop_patch_matches_expected(base in digest_set(), picks in digest_set(), extra in digest_set()) {
            let removals = base.intersection(&picks);
            let additions = base.complement(&extra);
            let result = base.patch(&removals, &additions).unwrap();
            let expected = removals.complement(&base).union(&additions);
            let (left, right) = result.diff(&expected);
            prop_assert!(left.is_empty());
            prop_assert!(right.is_empty());
        }
    }
}

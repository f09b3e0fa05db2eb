//! Proptest generators for property-based testing.

use std::collections::BTreeSet;

use proptest::prelude::*;

use keysync_core::{Digest, DigestVector, Manifest, Object, PropertyList, PropertyValue};

/// Generate a random digest.
pub fn digest() -> impl Strategy<Value = Digest> {
    any::<[u8; 20]>().prop_map(Digest::from_bytes)
}

/// Generate a sorted, duplicate-free set of up to `max` digests.
pub fn digest_set(max: usize) -> impl Strategy<Value = BTreeSet<Digest>> {
    prop::collection::btree_set(digest(), 0..=max)
}

/// Generate a valid digest vector.
pub fn digest_vector(max: usize) -> impl Strategy<Value = DigestVector> {
    digest_set(max).prop_map(DigestVector::from_unsorted)
}

/// Generate a valid manifest.
pub fn manifest(max: usize) -> impl Strategy<Value = Manifest> {
    digest_set(max).prop_map(Manifest::from_unsorted)
}

/// Generate two manifests drawn from a shared pool, so they overlap.
pub fn overlapping_manifests(max: usize) -> impl Strategy<Value = (Manifest, Manifest)> {
    prop::collection::vec((digest(), any::<bool>(), any::<bool>()), 0..=max).prop_map(|entries| {
        let left = entries.iter().filter(|e| e.1).map(|e| e.0);
        let right = entries.iter().filter(|e| e.2).map(|e| e.0);
        (Manifest::from_unsorted(left), Manifest::from_unsorted(right))
    })
}

/// Generate a `(base, removals, additions)` triple valid for `patch`.
pub fn patch_inputs(max: usize) -> impl Strategy<Value = (DigestVector, DigestVector, DigestVector)> {
    prop::collection::vec((digest(), 0u8..3), 0..=max).prop_map(|entries| {
        // 0: kept in base, 1: removed from base, 2: added
        let pick = |wanted: &[u8]| {
            DigestVector::from_unsorted(
                entries
                    .iter()
                    .filter(|(_, role)| wanted.contains(role))
                    .map(|(digest, _)| *digest),
            )
        };
        let base = pick(&[0, 1]);
        let removals = pick(&[1]);
        let additions = pick(&[2]);
        (base, removals, additions)
    })
}

/// Generate an attribute name.
pub fn attribute_name() -> impl Strategy<Value = String> {
    "[a-z][a-zA-Z_]{0,11}".prop_map(String::from)
}

/// Generate an attribute value.
pub fn property_value() -> impl Strategy<Value = PropertyValue> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..64).prop_map(PropertyValue::Bytes),
        "[ -~]{0,32}".prop_map(PropertyValue::Text),
        any::<i64>().prop_map(PropertyValue::Integer),
        any::<bool>().prop_map(PropertyValue::Bool),
    ]
}

/// Generate a property list with up to `max` attributes.
pub fn property_list(max: usize) -> impl Strategy<Value = PropertyList> {
    prop::collection::btree_map(attribute_name(), property_value(), 0..=max)
}

/// Generate an arbitrary object.
pub fn object() -> impl Strategy<Value = Object> {
    property_list(8).prop_map(Object::new)
}

/// Parameters for a keychain item.
#[derive(Debug, Clone)]
pub struct ItemParams {
    pub account: String,
    pub modified: i64,
    pub secret: Vec<u8>,
}

impl Arbitrary for ItemParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            "[a-z]{1,8}",
            0i64..1_000,
            prop::collection::vec(any::<u8>(), 1..32),
        )
            .prop_map(|(account, modified, secret)| ItemParams {
                account,
                modified,
                secret,
            })
            .boxed()
    }
}

/// Build the keychain item described by `params`.
pub fn item_from_params(params: &ItemParams) -> Object {
    crate::fixtures::keychain_item(&params.account, params.modified, &params.secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_manifests_roundtrip(m in manifest(64)) {
            let decoded = Manifest::from_bytes(&m.to_bytes()).unwrap();
            prop_assert_eq!(decoded.digest(), m.digest());
        }

        #[test]
        fn generated_objects_are_canonical(o in object()) {
            let decoded = Object::from_canonical_bytes(o.canonical_bytes()).unwrap();
            prop_assert_eq!(decoded.digest(), o.digest());
        }

        #[test]
        fn patch_inputs_are_valid((base, removals, additions) in patch_inputs(48)) {
            prop_assert!(removals.is_subset_of(&base));
            let patched = base.patch(&removals, &additions).unwrap();
            let expected = removals.complement(&base).union(&additions);
            prop_assert_eq!(patched, expected);
        }

        #[test]
        fn overlapping_manifests_diff_reconstructs((a, b) in overlapping_manifests(48)) {
            let (only_a, only_b) = a.diff(&b);
            let both = a.intersection(&b);
            prop_assert_eq!(only_a.union(&both), a);
            prop_assert_eq!(only_b.union(&both), b);
        }
    }
}

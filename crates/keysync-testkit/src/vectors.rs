//! Golden test vectors for deterministic verification.
//!
//! These vectors pin the canonical object encoding, the 20-byte digest, and
//! the manifest self-digest, so every implementation agrees on which bytes
//! are exchanged and which digests are compared.

use serde::Serialize;

use keysync_core::{Digest, Manifest, Object, PropertyList, PropertyValue};

/// A golden test vector for one object.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Attributes of the object.
    pub properties: fn() -> PropertyList,
    /// Expected canonical CBOR encoding (hex).
    pub expected_canonical: &'static str,
    /// Expected object digest (hex).
    pub expected_digest: &'static str,
}

/// Digest of an empty input (and so of the empty manifest).
pub const EMPTY_DIGEST: &str = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9";

/// Digest of the manifest holding every vector in [`all_vectors`].
pub const ALL_VECTORS_MANIFEST_DIGEST: &str = "68797c879a596686c48941fa77afc4ed393232c5";

fn list<const N: usize>(entries: [(&str, PropertyValue); N]) -> PropertyList {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "empty object",
            properties: PropertyList::new,
            expected_canonical: "a0",
            expected_digest: "1f94cbf313b3ce23257a7251ea0fc95a24556ea6",
        },
        GoldenVector {
            name: "generic password",
            properties: || {
                list([
                    ("class", "genp".into()),
                    ("acct", "alice".into()),
                    ("svce", "mail".into()),
                    ("mdat", 1_736_870_400_000i64.into()),
                    ("v_Data", b"hunter2".to_vec().into()),
                ])
            },
            expected_canonical: concat!(
                "a5646163637465616c696365646d6461741b00000194658b10006473766365",
                "646d61696c65636c6173736467656e7066765f446174614768756e74657232",
            ),
            expected_digest: "5b5d30b25983466779d526bc88d0922904fbac58",
        },
        GoldenVector {
            name: "negative integer and booleans",
            properties: || {
                list([
                    ("n", (-42i64).into()),
                    ("sync", true.into()),
                    ("tomb", false.into()),
                ])
            },
            expected_canonical: "a3616e38296473796e63f564746f6d62f4",
            expected_digest: "01b41b7c84381fea1b2e128d5f3e6b840443eaa5",
        },
        GoldenVector {
            // Shorter keys sort first: "a" < "z" < "aa" < "bb".
            name: "key order by encoded bytes",
            properties: || {
                list([
                    ("a", 1i64.into()),
                    ("bb", 2i64.into()),
                    ("z", 3i64.into()),
                    ("aa", 4i64.into()),
                ])
            },
            expected_canonical: "a4616101617a036261610462626202",
            expected_digest: "0df7e4f0d341d12133cf1261779c1e8173e5a198",
        },
        GoldenVector {
            name: "300-byte secret",
            properties: || {
                list([
                    ("acct", "bob".into()),
                    ("v_Data", (0..300u32).map(|i| i as u8).collect::<Vec<u8>>().into()),
                ])
            },
            expected_canonical: concat!(
                "a2646163637463626f6266765f4461746159012c",
                "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
                "202122232425262728292a2b2c2d2e2f303132333435363738393a3b3c3d3e3f",
                "404142434445464748494a4b4c4d4e4f505152535455565758595a5b5c5d5e5f",
                "606162636465666768696a6b6c6d6e6f707172737475767778797a7b7c7d7e7f",
                "808182838485868788898a8b8c8d8e8f909192939495969798999a9b9c9d9e9f",
                "a0a1a2a3a4a5a6a7a8a9aaabacadaeafb0b1b2b3b4b5b6b7b8b9babbbcbdbebf",
                "c0c1c2c3c4c5c6c7c8c9cacbcccdcecfd0d1d2d3d4d5d6d7d8d9dadbdcdddedf",
                "e0e1e2e3e4e5e6e7e8e9eaebecedeeeff0f1f2f3f4f5f6f7f8f9fafbfcfdfeff",
                "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
                "202122232425262728292a2b",
            ),
            expected_digest: "825c6666917c1e3090f8de95a3585fb9d685acd5",
        },
    ]
}

/// Build the object described by a vector.
pub fn object_from_vector(vector: &GoldenVector) -> Object {
    Object::new((vector.properties)())
}

/// The manifest holding every vector's object.
pub fn vectors_manifest() -> Manifest {
    Manifest::from_unsorted(all_vectors().iter().map(|v| object_from_vector(v).digest()))
}

/// Check every vector, returning a description of each mismatch.
pub fn verify_all_vectors() -> Result<(), Vec<String>> {
    let mut failures = Vec::new();

    for vector in all_vectors() {
        let object = object_from_vector(&vector);
        let canonical = hex::encode(object.canonical_bytes());
        if canonical != vector.expected_canonical {
            failures.push(format!(
                "{}: canonical {} != expected {}",
                vector.name, canonical, vector.expected_canonical
            ));
        }
        if object.digest().to_hex() != vector.expected_digest {
            failures.push(format!(
                "{}: digest {} != expected {}",
                vector.name,
                object.digest().to_hex(),
                vector.expected_digest
            ));
        }
        match Object::from_canonical_bytes(object.canonical_bytes()) {
            Ok(decoded) if decoded == object => {}
            _ => failures.push(format!("{}: canonical bytes do not decode back", vector.name)),
        }
    }

    let manifest_digest = vectors_manifest().digest().to_hex();
    if manifest_digest != ALL_VECTORS_MANIFEST_DIGEST {
        failures.push(format!(
            "manifest digest {} != expected {}",
            manifest_digest, ALL_VECTORS_MANIFEST_DIGEST
        ));
    }
    if Manifest::empty().digest().to_hex() != EMPTY_DIGEST {
        failures.push("empty manifest digest mismatch".into());
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures)
    }
}

/// A vector as exported for other implementations.
#[derive(Debug, Serialize)]
pub struct ExportedVector {
    pub name: String,
    pub canonical: String,
    pub digest: String,
}

/// All vectors plus the manifest digest, as pretty-printed JSON.
pub fn export_json() -> serde_json::Result<String> {
    #[derive(Serialize)]
    struct Export {
        objects: Vec<ExportedVector>,
        manifest: Vec<String>,
        manifest_digest: String,
    }

    let objects = all_vectors()
        .iter()
        .map(|vector| {
            let object = object_from_vector(vector);
            ExportedVector {
                name: vector.name.to_string(),
                canonical: hex::encode(object.canonical_bytes()),
                digest: object.digest().to_hex(),
            }
        })
        .collect();
    let manifest = vectors_manifest();

    serde_json::to_string_pretty(&Export {
        objects,
        manifest: manifest.iter().map(Digest::to_hex).collect(),
        manifest_digest: manifest.digest().to_hex(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vectors_verify() {
        if let Err(failures) = verify_all_vectors() {
            panic!("golden vector mismatches:\n{}", failures.join("\n"));
        }
    }

    #[test]
    fn test_vector_names_unique() {
        let vectors = all_vectors();
        let mut names: Vec<_> = vectors.iter().map(|v| v.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), vectors.len());
    }

    #[test]
    fn test_export_json_lists_every_vector() {
        let json = export_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value["objects"].as_array().unwrap().len(),
            all_vectors().len()
        );
        assert_eq!(value["manifest_digest"], ALL_VECTORS_MANIFEST_DIGEST);
    }
}

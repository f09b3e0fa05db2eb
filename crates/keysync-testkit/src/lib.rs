//! # Keysync Testkit
//!
//! Testing utilities for keysync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known objects with expected canonical bytes and digests
//! - **Generators**: Proptest strategies for digests, manifests, and objects
//! - **Fixtures**: Keychain items, engine pairs, and node meshes
//!
//! ## Golden Vectors
//!
//! ```rust
//! use keysync_testkit::vectors::{all_vectors, object_from_vector};
//!
//! for vector in all_vectors() {
//!     let object = object_from_vector(&vector);
//!     assert_eq!(object.digest().to_hex(), vector.expected_digest);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use keysync_testkit::generators::overlapping_manifests;
//!
//! proptest! {
//!     #[test]
//!     fn complement_is_half_of_diff((a, b) in overlapping_manifests(32)) {
//!         prop_assert_eq!(a.complement(&b), a.diff(&b).1);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use keysync_testkit::fixtures::{keychain_item, EnginePair};
//!
//! let pair = EnginePair::new(&[keychain_item("alice", 1, b"pw")], &[]);
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{keychain_item, keychain_store, random_items, EnginePair, Mesh, PEER_A, PEER_B};
pub use generators::{item_from_params, ItemParams};
pub use vectors::{all_vectors, object_from_vector, verify_all_vectors, GoldenVector};

//! # Keysync Core
//!
//! Pure primitives for manifest-based set reconciliation.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over sorted sets of content digests.
//!
//! ## Key Types
//!
//! - [`Digest`] - Fixed-length content hash identifying an object
//! - [`DigestVector`] - Strictly ascending, duplicate-free sequence of digests
//! - [`Manifest`] - Immutable digest set with a cached self-digest
//! - [`Object`] - Property-list record addressed by the digest of its canonical encoding
//!
//! ## Set Algebra
//!
//! Every operation is a single linear merge-scan over two sorted vectors and
//! always yields a vector that satisfies the ordering invariant:
//!
//! ```rust
//! use keysync_core::{Digest, Manifest};
//!
//! let a = Manifest::from_unsorted([Digest::hash(b"1"), Digest::hash(b"2")]);
//! let b = Manifest::from_unsorted([Digest::hash(b"2"), Digest::hash(b"3")]);
//!
//! let (only_a, only_b) = a.diff(&b);
//! assert_eq!(only_a.count(), 1);
//! assert_eq!(only_b.count(), 1);
//! assert_eq!(a.complement(&b), only_b);
//! ```

pub mod canonical;
pub mod digest;
pub mod error;
pub mod manifest;
pub mod object;
pub mod vector;

pub use canonical::{decode_property_list, encode_property_list};
pub use digest::{Digest, DigestHasher, DIGEST_SIZE};
pub use error::{CoreError, Result};
pub use manifest::Manifest;
pub use object::{Object, ObjectBuilder, PropertyList, PropertyValue};
pub use vector::DigestVector;

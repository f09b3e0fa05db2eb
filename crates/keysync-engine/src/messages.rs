//! Sync protocol message types.
//!
//! Three escalating messages carry progressively more detail about the
//! sender's store: its manifest digest, its full manifest, and its manifest
//! together with the objects the receiver is known to lack. Messages are
//! encoded as CBOR. Every manifest and object is re-validated on decode.

use std::collections::HashSet;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use keysync_core::{Digest, Manifest, Object};

use crate::error::{Result, SyncError};

/// Unique identifier for a peer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random peer ID.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 0;

/// Message size limits.
pub mod limits {
    /// Max digests in a carried manifest.
    pub const MAX_MANIFEST_DIGESTS: usize = 1_000_000;
    /// Max objects carried by one message.
    pub const MAX_OBJECTS_PER_MESSAGE: usize = 1_000;
    /// Max canonical size of a single carried object.
    pub const MAX_OBJECT_BYTES: usize = 1 << 20;
}

/// Sync protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Cheapest probe: the digest of the sender's manifest.
    ManifestDigest { version: u8, digest: Digest },

    /// The sender's full manifest.
    Manifest {
        version: u8,
        /// Serialized digest vector.
        manifest: Bytes,
    },

    /// The sender's manifest plus objects the receiver lacks.
    ManifestAndObjects {
        version: u8,
        /// Serialized digest vector.
        manifest: Bytes,
        /// Canonical encodings of the carried objects.
        objects: Vec<Bytes>,
    },
}

/// Escalation tier of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ManifestDigest,
    Manifest,
    ManifestAndObjects,
}

impl SyncMessage {
    pub fn manifest_digest(manifest: &Manifest) -> Self {
        SyncMessage::ManifestDigest {
            version: PROTOCOL_VERSION,
            digest: manifest.digest(),
        }
    }

    pub fn manifest(manifest: &Manifest) -> Self {
        SyncMessage::Manifest {
            version: PROTOCOL_VERSION,
            manifest: Bytes::from(manifest.to_bytes()),
        }
    }

    pub fn manifest_and_objects(manifest: &Manifest, objects: &[Object]) -> Self {
        SyncMessage::ManifestAndObjects {
            version: PROTOCOL_VERSION,
            manifest: Bytes::from(manifest.to_bytes()),
            objects: objects
                .iter()
                .map(|object| Bytes::copy_from_slice(object.canonical_bytes()))
                .collect(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            SyncMessage::ManifestDigest { .. } => MessageKind::ManifestDigest,
            SyncMessage::Manifest { .. } => MessageKind::Manifest,
            SyncMessage::ManifestAndObjects { .. } => MessageKind::ManifestAndObjects,
        }
    }

    fn version(&self) -> u8 {
        match self {
            SyncMessage::ManifestDigest { version, .. }
            | SyncMessage::Manifest { version, .. }
            | SyncMessage::ManifestAndObjects { version, .. } => *version,
        }
    }

    /// Encode to wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| SyncError::Encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from wire bytes without validating content.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| SyncError::InvalidMessage(e.to_string()))
    }

    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        let manifest = match self {
            SyncMessage::ManifestDigest { .. } => return Ok(()),
            SyncMessage::Manifest { manifest, .. } => manifest,
            SyncMessage::ManifestAndObjects {
                manifest, objects, ..
            } => {
                if objects.len() > limits::MAX_OBJECTS_PER_MESSAGE {
                    return Err("too many objects");
                }
                if objects.iter().any(|o| o.len() > limits::MAX_OBJECT_BYTES) {
                    return Err("object too large");
                }
                manifest
            }
        };
        if manifest.len() / keysync_core::DIGEST_SIZE > limits::MAX_MANIFEST_DIGESTS {
            return Err("manifest too large");
        }
        Ok(())
    }

    /// Validate and decode the message content.
    ///
    /// Fails closed with [`SyncError::InvalidMessage`] (or
    /// [`SyncError::VersionMismatch`]) on any violation: unsorted or
    /// mis-sized manifests, non-canonical objects, duplicated objects, or
    /// objects the carried manifest does not list.
    pub fn decode(self) -> Result<DecodedMessage> {
        if self.version() != PROTOCOL_VERSION {
            return Err(SyncError::VersionMismatch {
                local: PROTOCOL_VERSION,
                peer: self.version(),
            });
        }
        self.validate_limits()
            .map_err(|reason| SyncError::InvalidMessage(reason.into()))?;

        let kind = self.kind();
        match self {
            SyncMessage::ManifestDigest { digest, .. } => Ok(DecodedMessage {
                kind,
                digest,
                manifest: None,
                objects: Vec::new(),
            }),
            SyncMessage::Manifest { manifest, .. } => {
                let manifest = decode_manifest(&manifest)?;
                Ok(DecodedMessage {
                    kind,
                    digest: manifest.digest(),
                    manifest: Some(manifest),
                    objects: Vec::new(),
                })
            }
            SyncMessage::ManifestAndObjects {
                manifest, objects, ..
            } => {
                let manifest = decode_manifest(&manifest)?;

                let mut seen = HashSet::with_capacity(objects.len());
                let mut decoded = Vec::with_capacity(objects.len());
                for bytes in &objects {
                    let object = Object::from_canonical_bytes(bytes).map_err(|e| {
                        SyncError::InvalidMessage(format!("invalid object: {}", e))
                    })?;
                    if !manifest.contains(&object.digest()) {
                        return Err(SyncError::InvalidMessage(format!(
                            "object {} is not in the carried manifest",
                            object.digest()
                        )));
                    }
                    if !seen.insert(object.digest()) {
                        return Err(SyncError::InvalidMessage(format!(
                            "object {} carried twice",
                            object.digest()
                        )));
                    }
                    decoded.push(object);
                }

                Ok(DecodedMessage {
                    kind,
                    digest: manifest.digest(),
                    manifest: Some(manifest),
                    objects: decoded,
                })
            }
        }
    }
}

fn decode_manifest(bytes: &[u8]) -> Result<Manifest> {
    Manifest::from_bytes(bytes)
        .map_err(|e| SyncError::InvalidMessage(format!("invalid manifest: {}", e)))
}

/// A fully validated incoming message.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    pub kind: MessageKind,
    /// Digest of the sender's manifest.
    pub digest: Digest,
    /// The sender's manifest, absent for digest-only messages.
    pub manifest: Option<Manifest>,
    /// Carried objects, each listed in `manifest`.
    pub objects: Vec<Object>,
}

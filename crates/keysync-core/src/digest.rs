//! Content digests.
//!
//! A digest is the first [`DIGEST_SIZE`] bytes of the BLAKE3 extendable output
//! over its input. Equality and ordering are byte-wise.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a digest in bytes.
pub const DIGEST_SIZE: usize = 20;

/// A fixed-length content hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; DIGEST_SIZE]);

impl Digest {
    /// Compute the digest of the given data.
    pub fn hash(data: &[u8]) -> Self {
        let mut hasher = DigestHasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        Self::try_from(bytes.as_slice()).map_err(|_| hex::FromHexError::InvalidStringLength)
    }

    /// The all-zero digest, which sorts before every other digest.
    pub const ZERO: Self = Self([0u8; DIGEST_SIZE]);
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; DIGEST_SIZE]> for Digest {
    fn from(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Digest {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; DIGEST_SIZE] = slice.try_into()?;
        Ok(Self(arr))
    }
}

/// Incremental digest computation over a byte stream.
#[derive(Clone, Default)]
pub struct DigestHasher {
    inner: blake3::Hasher,
}

impl DigestHasher {
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    /// Feed more input.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    /// Produce the digest of everything fed so far.
    pub fn finalize(&self) -> Digest {
        let mut out = [0u8; DIGEST_SIZE];
        self.inner.finalize_xof().fill(&mut out);
        Digest(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_deterministic() {
        let d1 = Digest::hash(b"test data");
        let d2 = Digest::hash(b"test data");
        assert_eq!(d1, d2);
        assert_ne!(d1, Digest::hash(b"different data"));
    }

    #[test]
    fn test_digest_is_blake3_prefix() {
        let full = blake3::hash(b"prefix");
        let digest = Digest::hash(b"prefix");
        assert_eq!(&full.as_bytes()[..DIGEST_SIZE], digest.as_bytes());
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut hasher = DigestHasher::new();
        hasher.update(b"hello ").update(b"world");
        assert_eq!(hasher.finalize(), Digest::hash(b"hello world"));
    }

    #[test]
    fn test_digest_hex_roundtrip() {
        let digest = Digest::from_bytes([0x42; DIGEST_SIZE]);
        let recovered = Digest::from_hex(&digest.to_hex()).unwrap();
        assert_eq!(digest, recovered);
        assert!(Digest::from_hex("abcd").is_err());
    }

    #[test]
    fn test_digest_ordering_is_bytewise() {
        let mut low = [0u8; DIGEST_SIZE];
        let mut high = [0u8; DIGEST_SIZE];
        low[DIGEST_SIZE - 1] = 0xff;
        high[0] = 0x01;
        assert!(Digest(low) < Digest(high));
        assert!(Digest::ZERO < Digest(low));
    }

    #[test]
    fn test_digest_display() {
        let digest = Digest::from_bytes([0xab; DIGEST_SIZE]);
        assert_eq!(format!("{}", digest), "abababababababab");
        assert!(format!("{:?}", digest).starts_with("Digest("));
    }
}

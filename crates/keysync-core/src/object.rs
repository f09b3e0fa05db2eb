//! Synchronized objects.
//!
//! An [`Object`] is a property list (attribute name to value) addressed by
//! the digest of its canonical encoding. Objects are opaque to the sync
//! engine: it only moves their canonical bytes and compares their digests.

use std::collections::BTreeMap;

use crate::canonical::{decode_property_list, encode_property_list};
use crate::digest::Digest;
use crate::error::Result;

/// Attribute name to value mapping.
pub type PropertyList = BTreeMap<String, PropertyValue>;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyValue {
    Bytes(Vec<u8>),
    Text(String),
    Integer(i64),
    Bool(bool),
}

impl PropertyValue {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Text(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Text(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        PropertyValue::Integer(n)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(b: Vec<u8>) -> Self {
        PropertyValue::Bytes(b)
    }
}

/// A property-list record together with its canonical encoding and digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    properties: PropertyList,
    canonical: Vec<u8>,
    digest: Digest,
}

impl Object {
    /// Create an object, computing its canonical encoding and digest.
    pub fn new(properties: PropertyList) -> Self {
        let canonical = encode_property_list(&properties);
        let digest = Digest::hash(&canonical);
        Self {
            properties,
            canonical,
            digest,
        }
    }

    /// Start building an object attribute by attribute.
    pub fn builder() -> ObjectBuilder {
        ObjectBuilder::default()
    }

    /// Decode an object from canonical bytes (non-canonical input is rejected).
    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self> {
        let properties = decode_property_list(bytes)?;
        Ok(Self {
            properties,
            canonical: bytes.to_vec(),
            digest: Digest::hash(bytes),
        })
    }

    pub fn properties(&self) -> &PropertyList {
        &self.properties
    }

    pub fn into_properties(self) -> PropertyList {
        self.properties
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn canonical_bytes(&self) -> &[u8] {
        &self.canonical
    }

    pub fn digest(&self) -> Digest {
        self.digest
    }
}

/// Builder for [`Object`].
#[derive(Debug, Clone, Default)]
pub struct ObjectBuilder {
    properties: PropertyList,
}

impl ObjectBuilder {
    /// Set an attribute, replacing any previous value.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Object {
        Object::new(self.properties)
    }
}

//! Canonical CBOR encoding for property lists.
//!
//! This module implements RFC 8949 Core Deterministic Encoding for the
//! subset of CBOR that property lists use:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats
//!
//! Decoding is strict: input whose re-encoding is not byte-identical is
//! rejected, so an object's digest is always the digest of the bytes it
//! arrived as.

use ciborium::value::Value;

use crate::error::{CoreError, Result};
use crate::object::{PropertyList, PropertyValue};

/// Encode a property list to canonical CBOR bytes.
pub fn encode_property_list(properties: &PropertyList) -> Vec<u8> {
    // Encode all keys first to sort by encoded bytes
    let mut entries: Vec<(Vec<u8>, &PropertyValue)> = properties
        .iter()
        .map(|(key, value)| {
            let mut key_buf = Vec::with_capacity(key.len() + 1);
            encode_text(&mut key_buf, key);
            (key_buf, value)
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut buf = Vec::new();
    encode_uint(&mut buf, 5, entries.len() as u64);
    for (key_bytes, value) in entries {
        buf.extend_from_slice(&key_bytes);
        encode_value(&mut buf, value);
    }
    buf
}

/// Decode a property list from canonical CBOR bytes.
pub fn decode_property_list(bytes: &[u8]) -> Result<PropertyList> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;

    let entries = match value {
        Value::Map(entries) => entries,
        _ => return Err(CoreError::MalformedObject("expected map".into())),
    };

    let mut properties = PropertyList::new();
    for (key, value) in entries {
        let key = match key {
            Value::Text(key) => key,
            _ => return Err(CoreError::MalformedObject("property key is not text".into())),
        };
        let value = cbor_value_to_property(value)?;
        if properties.insert(key.clone(), value).is_some() {
            return Err(CoreError::MalformedObject(format!(
                "duplicate property {:?}",
                key
            )));
        }
    }

    if encode_property_list(&properties) != bytes {
        return Err(CoreError::MalformedObject("encoding is not canonical".into()));
    }

    Ok(properties)
}

fn cbor_value_to_property(value: Value) -> Result<PropertyValue> {
    match value {
        Value::Bytes(b) => Ok(PropertyValue::Bytes(b)),
        Value::Text(s) => Ok(PropertyValue::Text(s)),
        Value::Bool(b) => Ok(PropertyValue::Bool(b)),
        Value::Integer(i) => {
            let n: i128 = i.into();
            i64::try_from(n)
                .map(PropertyValue::Integer)
                .map_err(|_| CoreError::MalformedObject(format!("integer {} out of range", n)))
        }
        _ => Err(CoreError::MalformedObject(
            "unsupported property value type".into(),
        )),
    }
}

fn encode_value(buf: &mut Vec<u8>, value: &PropertyValue) {
    match value {
        PropertyValue::Bytes(b) => {
            encode_uint(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
        PropertyValue::Text(s) => encode_text(buf, s),
        PropertyValue::Integer(n) => encode_integer(buf, *n),
        PropertyValue::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, n: i64) {
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, !(n as u64));
    }
}

/// Encode a text string (major type 3).
fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

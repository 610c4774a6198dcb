//! Canonical CBOR encoding for objects.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats (dates are whole seconds under tag 1)
//!
//! The canonical encoding is what object digests are computed over, so the
//! same object must produce identical bytes on every node. Arrays of objects
//! use the same encoding and form the `objects` payload of delta messages.

use std::collections::BTreeMap;

use bytes::Bytes;
use ciborium::value::Value as Cbor;

use crate::error::{CoreError, Result};
use crate::object::{Object, Value};

/// CBOR tag for epoch-based date/time.
const TAG_EPOCH_DATE: u64 = 1;

/// Major types used by the encoder.
mod major {
    pub const UNSIGNED: u8 = 0;
    pub const NEGATIVE: u8 = 1;
    pub const BYTES: u8 = 2;
    pub const TEXT: u8 = 3;
    pub const ARRAY: u8 = 4;
    pub const MAP: u8 = 5;
    pub const TAG: u8 = 6;
}

/// Encode an object to canonical bytes.
pub fn canonical_bytes(object: &Object) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_map_canonical(&mut buf, object.attributes());
    buf
}

/// Encode a sequence of objects as a canonical array of maps.
pub fn encode_object_array(objects: &[Object]) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_uint(&mut buf, major::ARRAY, objects.len() as u64);
    for object in objects {
        encode_map_canonical(&mut buf, object.attributes());
    }
    buf
}

/// Decode a single object from canonical bytes.
pub fn decode_object(bytes: &[u8]) -> Result<Object> {
    match read_exact_value(bytes)? {
        Cbor::Map(entries) => Ok(Object::new(map_from_cbor(entries)?)),
        _ => Err(CoreError::DecodingError("object is not a map".into())),
    }
}

/// Decode an array of objects.
///
/// Fails unless the input is exactly one array whose elements are all maps.
pub fn decode_object_array(bytes: &[u8]) -> Result<Vec<Object>> {
    let items = match read_exact_value(bytes)? {
        Cbor::Array(items) => items,
        _ => return Err(CoreError::DecodingError("objects are not an array".into())),
    };

    let mut objects = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match item {
            Cbor::Map(entries) => objects.push(Object::new(map_from_cbor(entries)?)),
            _ => {
                return Err(CoreError::DecodingError(format!(
                    "element {} is not a map",
                    index
                )))
            }
        }
    }
    Ok(objects)
}

/// Parse one CBOR item and require that it consumes the whole buffer.
fn read_exact_value(bytes: &[u8]) -> Result<Cbor> {
    let mut reader = bytes;
    let value: Cbor =
        ciborium::from_reader(&mut reader).map_err(|e| CoreError::DecodingError(e.to_string()))?;
    if !reader.is_empty() {
        return Err(CoreError::DecodingError(format!(
            "{} trailing bytes after CBOR item",
            reader.len()
        )));
    }
    Ok(value)
}

/// Recursively encode a value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Bool(b) => {
            buf.push(if *b { 0xf5 } else { 0xf4 });
        }
        Value::Integer(n) => {
            encode_integer(buf, *n);
        }
        Value::String(s) => {
            encode_text(buf, s);
        }
        Value::Data(b) => {
            encode_bytes(buf, b);
        }
        Value::Date(secs) => {
            encode_uint(buf, major::TAG, TAG_EPOCH_DATE);
            encode_integer(buf, *secs);
        }
        Value::Dictionary(map) => {
            encode_map_canonical(buf, map);
        }
        Value::Array(items) => {
            encode_uint(buf, major::ARRAY, items.len() as u64);
            for item in items {
                encode_value_to(buf, item);
            }
        }
    }
}

/// Encode a signed integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, n: i64) {
    if n >= 0 {
        encode_uint(buf, major::UNSIGNED, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, major::NEGATIVE, (-1 - n) as u64);
    }
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
    } else if n <= 0xffffffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, major::BYTES, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, major::TEXT, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison, which orders shorter
/// keys first and is not the same as `BTreeMap` order.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &BTreeMap<String, Value>) {
    let mut key_value_pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_text(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();

    key_value_pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, major::MAP, key_value_pairs.len() as u64);

    for (key_bytes, value) in key_value_pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}

/// Convert decoded CBOR map entries into an attribute map.
fn map_from_cbor(entries: Vec<(Cbor, Cbor)>) -> Result<BTreeMap<String, Value>> {
    let mut map = BTreeMap::new();
    for (key, value) in entries {
        let key = match key {
            Cbor::Text(s) => s,
            _ => return Err(CoreError::DecodingError("map key is not text".into())),
        };
        let value = value_from_cbor(value)?;
        if map.insert(key.clone(), value).is_some() {
            return Err(CoreError::DecodingError(format!("duplicate key {:?}", key)));
        }
    }
    Ok(map)
}

fn value_from_cbor(value: Cbor) -> Result<Value> {
    match value {
        Cbor::Bool(b) => Ok(Value::Bool(b)),
        Cbor::Integer(i) => integer_from_cbor(i).map(Value::Integer),
        Cbor::Text(s) => Ok(Value::String(s)),
        Cbor::Bytes(b) => Ok(Value::Data(Bytes::from(b))),
        Cbor::Tag(TAG_EPOCH_DATE, inner) => match *inner {
            Cbor::Integer(i) => integer_from_cbor(i).map(Value::Date),
            _ => Err(CoreError::DecodingError("date is not an integer".into())),
        },
        Cbor::Array(items) => items
            .into_iter()
            .map(value_from_cbor)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Cbor::Map(entries) => map_from_cbor(entries).map(Value::Dictionary),
        Cbor::Float(_) => Err(CoreError::DecodingError("floats are not supported".into())),
        Cbor::Tag(tag, _) => Err(CoreError::DecodingError(format!("unsupported tag {}", tag))),
        _ => Err(CoreError::DecodingError("unsupported CBOR value type".into())),
    }
}

fn integer_from_cbor(i: ciborium::value::Integer) -> Result<i64> {
    let n: i128 = i.into();
    i64::try_from(n).map_err(|_| CoreError::DecodingError(format!("integer {} out of range", n)))
}

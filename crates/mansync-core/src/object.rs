//! Object: the unit of content being reconciled.
//!
//! An object is an ordered property map. Its identity is the digest of its
//! canonical encoding, so two objects with the same properties always have
//! the same digest on every node.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::canonical::canonical_bytes;
use crate::types::Digest;

/// A property value.
///
/// Floats are deliberately absent: they have no canonical encoding that is
/// stable across platforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    String(String),
    Data(Bytes),
    /// Whole seconds since the Unix epoch.
    Date(i64),
    Dictionary(BTreeMap<String, Value>),
    Array(Vec<Value>),
}

impl Value {
    /// The date payload, if this is a [`Value::Date`].
    pub fn as_date(&self) -> Option<i64> {
        match self {
            Value::Date(secs) => Some(*secs),
            _ => None,
        }
    }

    /// The string payload, if this is a [`Value::String`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The integer payload, if this is a [`Value::Integer`].
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Data(Bytes::from(b))
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Data(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Dictionary(map)
    }
}

/// An immutable property map with a content-derived identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Object {
    attributes: BTreeMap<String, Value>,
}

impl Object {
    /// Wrap an existing attribute map.
    pub fn new(attributes: BTreeMap<String, Value>) -> Self {
        Self { attributes }
    }

    /// Start building an object.
    pub fn builder() -> ObjectBuilder {
        ObjectBuilder::default()
    }

    /// Look up an attribute.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// All attributes in key order.
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Consume the object, returning its attributes.
    pub fn into_attributes(self) -> BTreeMap<String, Value> {
        self.attributes
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// True if the object has no attributes.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// The canonical encoding of this object.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_bytes(self)
    }

    /// Content identity: digest of the canonical encoding.
    pub fn digest(&self) -> Digest {
        Digest::of(&canonical_bytes(self))
    }
}

/// Builder for creating objects.
#[derive(Debug, Default)]
pub struct ObjectBuilder {
    attributes: BTreeMap<String, Value>,
}

impl ObjectBuilder {
    /// Set an attribute.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set a date attribute.
    pub fn date(mut self, key: impl Into<String>, secs: i64) -> Self {
        self.attributes.insert(key.into(), Value::Date(secs));
        self
    }

    /// Finish building.
    pub fn build(self) -> Object {
        Object {
            attributes: self.attributes,
        }
    }
}

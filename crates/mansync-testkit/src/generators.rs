//! Proptest generators for property-based testing.

use std::collections::BTreeMap;

use bytes::Bytes;
use proptest::prelude::*;

use mansync_core::{Digest, Manifest, Object, Value, DIGEST_SIZE};
use mansync_sync::{ManifestDelta, Message};

/// Generate a random Digest.
pub fn arb_digest() -> impl Strategy<Value = Digest> {
    any::<[u8; DIGEST_SIZE]>().prop_map(Digest::from_bytes)
}

/// Generate a manifest of up to `max_len` digests.
pub fn arb_manifest(max_len: usize) -> impl Strategy<Value = Manifest> {
    prop::collection::vec(arb_digest(), 0..=max_len).prop_map(Manifest::from_digests)
}

/// Generate an attribute name.
pub fn attribute_name() -> impl Strategy<Value = String> {
    "[a-zA-Z_][a-zA-Z0-9_]{0,11}".prop_map(String::from)
}

/// Generate a property value, nesting arrays and dictionaries a few levels.
pub fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        ".{0,16}".prop_map(Value::String),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(|b| Value::Data(Bytes::from(b))),
        (0i64..=4_102_444_800).prop_map(Value::Date),
    ];

    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(attribute_name(), inner, 0..4)
                .prop_map(Value::Dictionary),
        ]
    })
}

/// Generate an object with a string `key` and a `mdat` date.
pub fn arb_object() -> impl Strategy<Value = Object> {
    (
        "[a-z0-9]{1,12}",
        0i64..=4_102_444_800,
        prop::collection::btree_map(attribute_name(), arb_value(), 0..5),
    )
        .prop_map(|(key, mdat, extra)| {
            let mut attributes: BTreeMap<String, Value> = extra;
            attributes.insert("key".into(), Value::String(key));
            attributes.insert("mdat".into(), Value::Date(mdat));
            Object::new(attributes)
        })
}

/// Generate a delta whose additions match the objects it carries.
pub fn arb_delta() -> impl Strategy<Value = ManifestDelta> {
    (
        arb_digest(),
        arb_manifest(8),
        prop::collection::vec(arb_object(), 0..4),
    )
        .prop_map(|(base_digest, removals, objects)| ManifestDelta {
            base_digest,
            removals,
            additions: Manifest::from_digests(objects.iter().map(Object::digest)),
            objects,
        })
}

/// Generate any wire message.
pub fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        arb_digest().prop_map(Message::ManifestDigest),
        arb_manifest(32).prop_map(Message::Manifest),
        arb_delta().prop_map(Message::ManifestDeltaAndObjects),
    ]
}

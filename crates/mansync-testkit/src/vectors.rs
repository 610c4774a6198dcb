//! Golden wire vectors.
//!
//! These encodings are fixed: any implementation of the protocol must
//! produce them byte for byte from the same messages, and must decode them
//! back to the same messages.

use serde::{Deserialize, Serialize};

use mansync_core::{Digest, Manifest, Object, DIGEST_SIZE};
use mansync_sync::{decode, describe_message, encode, ManifestDelta, Message};

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// The message to encode.
    pub message: Message,
    /// Expected encoding (hex).
    pub expected_hex: String,
}

/// Serializable form of a vector, for sharing with other implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedVector {
    pub name: String,
    pub description: String,
    pub encoding: String,
}

fn digest_of(byte: u8) -> Digest {
    Digest::from_bytes([byte; DIGEST_SIZE])
}

fn repeat(byte: u8) -> String {
    hex::encode([byte; DIGEST_SIZE])
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "manifest digest",
            message: Message::ManifestDigest(digest_of(0x11)),
            expected_hex: format!("3019020101 0414{}", repeat(0x11)),
        },
        GoldenVector {
            name: "empty manifest",
            message: Message::Manifest(Manifest::empty()),
            expected_hex: "3005020102 0400".into(),
        },
        GoldenVector {
            name: "two-entry manifest",
            message: Message::Manifest(Manifest::from_digests([
                digest_of(0x02),
                digest_of(0x01),
            ])),
            expected_hex: format!("302d020102 0428{}{}", repeat(0x01), repeat(0x02)),
        },
        GoldenVector {
            name: "empty delta",
            message: Message::ManifestDeltaAndObjects(ManifestDelta {
                base_digest: digest_of(0x22),
                removals: Manifest::empty(),
                additions: Manifest::empty(),
                objects: Vec::new(),
            }),
            expected_hex: format!("3022020103 301d 0414{} 0400 0400 040180", repeat(0x22)),
        },
        GoldenVector {
            name: "delta with one object",
            message: Message::ManifestDeltaAndObjects(ManifestDelta {
                base_digest: digest_of(0x22),
                removals: Manifest::from_digests([digest_of(0x01)]),
                additions: Manifest::from_digests([digest_of(0x02)]),
                objects: vec![Object::builder().attr("key", "a").build()],
            }),
            expected_hex: format!(
                "3051020103 304c 0414{} 0414{} 0414{} 0408 81a1636b65796161",
                repeat(0x22),
                repeat(0x01),
                repeat(0x02)
            ),
        },
    ]
    .into_iter()
    .map(|mut v| {
        v.expected_hex.retain(|c| !c.is_whitespace());
        v
    })
    .collect()
}

/// Encode every vector and compare against the expected bytes.
///
/// Returns `(name, matches, actual_hex)` for each vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let hex = hex::encode(encode(&v.message));
            let matches = hex == v.expected_hex;
            (v.name.to_string(), matches, hex)
        })
        .collect()
}

/// Export the vectors as pretty-printed JSON.
pub fn export_json() -> serde_json::Result<String> {
    let exported: Vec<ExportedVector> = all_vectors()
        .into_iter()
        .map(|v| ExportedVector {
            name: v.name.to_string(),
            description: v.message.to_string(),
            encoding: v.expected_hex,
        })
        .collect();
    serde_json::to_string_pretty(&exported)
}

/// Check a JSON export produced elsewhere: every encoding must decode, and
/// re-encode to the same bytes.
///
/// Returns the names of the vectors that failed.
pub fn check_exported(json: &str) -> serde_json::Result<Vec<String>> {
    let vectors: Vec<ExportedVector> = serde_json::from_str(json)?;
    Ok(vectors
        .into_iter()
        .filter(|v| {
            let Ok(bytes) = hex::decode(&v.encoding) else {
                return true;
            };
            match decode(&bytes) {
                Ok(message) => encode(&message)[..] != bytes[..],
                Err(_) => true,
            }
        })
        .map(|v| v.name)
        .collect())
}

/// One-line description of each vector's expected bytes, as decoded.
pub fn describe_all() -> Vec<String> {
    all_vectors()
        .iter()
        .filter_map(|v| hex::decode(&v.expected_hex).ok())
        .map(|bytes| describe_message(&bytes))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_vectors_match() {
        for (name, matches, hex) in verify_all_vectors() {
            assert!(matches, "vector '{}' encoded as {}", name, hex);
        }
    }

    #[test]
    fn test_vectors_decode_back() {
        for vector in all_vectors() {
            let bytes = hex::decode(&vector.expected_hex).unwrap();
            assert_eq!(
                decode(&bytes).unwrap(),
                vector.message,
                "vector '{}' did not decode to its message",
                vector.name
            );
        }
    }

    #[test]
    fn test_json_export_roundtrip() {
        let json = export_json().unwrap();
        assert!(json.contains("empty manifest"));
        assert!(check_exported(&json).unwrap().is_empty());

        let tampered = json.replace("3005020102", "3005020109");
        assert_eq!(check_exported(&tampered).unwrap(), vec!["empty manifest"]);
    }

    #[test]
    fn test_describe_all() {
        let described = describe_all();
        assert_eq!(described.len(), all_vectors().len());
        assert!(described[1].starts_with("Manifest(0 digests"));
        assert!(described.iter().all(|d| !d.starts_with("<undecodable")));
    }
}

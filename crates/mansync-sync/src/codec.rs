//! Wire codec for reconciliation messages.
//!
//! ```text
//! Message ::= SEQUENCE {
//!     messageType INTEGER (1 | 2 | 3)
//!     content     ANY
//! }
//! ManifestDigest          ::= OCTET STRING (20 bytes)
//! Manifest                ::= OCTET STRING (multiple of 20 bytes)
//! ManifestDeltaAndObjects ::= SEQUENCE {
//!     peerManifestDigest OCTET STRING (20 bytes)
//!     removals           OCTET STRING (multiple of 20 bytes)
//!     additions          OCTET STRING (multiple of 20 bytes)
//!     objects            OCTET STRING (canonical CBOR array of maps)
//! }
//! ```
//!
//! Encoding never fails. Decoding either returns a complete message or an
//! error; nothing is partially applied.

use bytes::Bytes;
use mansync_core::{decode_object_array, encode_object_array, Digest, Manifest, DIGEST_SIZE};

use crate::der::{DerReader, DerWriter};
use crate::error::DecodeError;
use crate::messages::{ManifestDelta, Message, MessageType};

/// Encode a message to wire bytes.
pub fn encode(message: &Message) -> Bytes {
    let mut writer = DerWriter::new();
    writer.sequence(|seq| {
        seq.integer(message.message_type() as i64);
        match message {
            Message::ManifestDigest(digest) => {
                seq.octet_string(digest.as_bytes());
            }
            Message::Manifest(manifest) => {
                seq.octet_string(manifest.as_bytes());
            }
            Message::ManifestDeltaAndObjects(delta) => {
                let objects = encode_object_array(&delta.objects);
                seq.sequence(|inner| {
                    inner
                        .octet_string(delta.base_digest.as_bytes())
                        .octet_string(delta.removals.as_bytes())
                        .octet_string(delta.additions.as_bytes())
                        .octet_string(&objects);
                });
            }
        }
    });
    Bytes::from(writer.finish())
}

/// Decode wire bytes into a message.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let mut outer = DerReader::new(bytes);
    let mut body = outer.sequence("message")?;
    outer.finish()?;

    let message_type = MessageType::try_from(body.integer("messageType")?)?;
    let message = match message_type {
        MessageType::ManifestDigest => {
            Message::ManifestDigest(read_digest(&mut body, "manifestDigest")?)
        }
        MessageType::Manifest => Message::Manifest(read_manifest(&mut body, "manifest")?),
        MessageType::ManifestDeltaAndObjects => {
            let mut delta = body.sequence("manifestDeltaAndObjects")?;
            let base_digest = read_digest(&mut delta, "peerManifestDigest")?;
            let removals = read_manifest(&mut delta, "removals")?;
            let additions = read_manifest(&mut delta, "additions")?;
            let objects = decode_object_array(delta.octet_string("objects")?)
                .map_err(|e| DecodeError::MalformedObjects(e.to_string()))?;
            delta.finish()?;

            Message::ManifestDeltaAndObjects(ManifestDelta {
                base_digest,
                removals,
                additions,
                objects,
            })
        }
    };
    body.finish()?;

    Ok(message)
}

/// One-line description of wire bytes for logs and debugging.
///
/// Never fails: undecodable input is described as such.
pub fn describe_message(bytes: &[u8]) -> String {
    match decode(bytes) {
        Ok(message) => message.to_string(),
        Err(e) => format!("<undecodable message, {} bytes: {}>", bytes.len(), e),
    }
}

fn read_digest(reader: &mut DerReader<'_>, field: &'static str) -> Result<Digest, DecodeError> {
    let contents = reader.octet_string(field)?;
    Digest::from_slice(contents).map_err(|_| {
        DecodeError::malformed(
            field,
            format!("expected {} bytes, got {}", DIGEST_SIZE, contents.len()),
        )
    })
}

fn read_manifest(reader: &mut DerReader<'_>, field: &'static str) -> Result<Manifest, DecodeError> {
    let contents = reader.octet_string(field)?;
    Manifest::from_bytes(Bytes::copy_from_slice(contents))
        .map_err(|e| DecodeError::malformed(field, e.to_string()))
}

//! Reconciliation message types.
//!
//! Three messages are exchanged between peers, from cheapest to most
//! expensive: a manifest digest, a full manifest, and a delta carrying the
//! objects the receiver is missing.

use std::fmt;

use mansync_core::{Digest, Manifest, Object};

use crate::error::DecodeError;

/// Message size limits.
pub mod limits {
    /// Default maximum objects carried by one delta.
    pub const MAX_OBJECTS_PER_MESSAGE: usize = 500;
    /// Default number of attempts to build a delta around corrupted objects.
    pub const MAX_BUILD_ATTEMPTS: usize = 3;
}

/// Wire discriminant of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ManifestDigest = 1,
    Manifest = 2,
    ManifestDeltaAndObjects = 3,
}

impl MessageType {
    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            MessageType::ManifestDigest => "ManifestDigest",
            MessageType::Manifest => "Manifest",
            MessageType::ManifestDeltaAndObjects => "ManifestDeltaAndObjects",
        }
    }
}

impl TryFrom<i64> for MessageType {
    type Error = DecodeError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::ManifestDigest),
            2 => Ok(MessageType::Manifest),
            3 => Ok(MessageType::ManifestDeltaAndObjects),
            other => Err(DecodeError::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Changes to apply to the receiver's manifest, plus the objects it lacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDelta {
    /// Digest of the manifest the sender believes the receiver holds.
    pub base_digest: Digest,
    /// Digests to drop from the base to reach the sender's manifest.
    pub removals: Manifest,
    /// Digests to add to the base to reach the sender's manifest.
    pub additions: Manifest,
    /// The objects named by `additions`.
    pub objects: Vec<Object>,
}

impl ManifestDelta {
    /// True if the delta changes nothing.
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty() && self.objects.is_empty()
    }
}

/// Reconciliation messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// "This is the digest of my manifest."
    ManifestDigest(Digest),

    /// "This is my whole manifest."
    Manifest(Manifest),

    /// "Relative to the manifest I think you hold, here is what changed."
    ManifestDeltaAndObjects(ManifestDelta),
}

impl Message {
    /// The wire discriminant.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::ManifestDigest(_) => MessageType::ManifestDigest,
            Message::Manifest(_) => MessageType::Manifest,
            Message::ManifestDeltaAndObjects(_) => MessageType::ManifestDeltaAndObjects,
        }
    }

    /// True if sending this message would tell the peer nothing.
    ///
    /// Only a delta can be empty; digests and manifests always carry
    /// information.
    pub fn is_empty(&self) -> bool {
        match self {
            Message::ManifestDeltaAndObjects(delta) => delta.is_empty(),
            Message::ManifestDigest(_) | Message::Manifest(_) => false,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::ManifestDigest(digest) => write!(f, "ManifestDigest({})", digest),
            Message::Manifest(manifest) => write!(
                f,
                "Manifest({} digests, digest {})",
                manifest.len(),
                manifest.digest()
            ),
            Message::ManifestDeltaAndObjects(delta) => write!(
                f,
                "ManifestDeltaAndObjects(base {}, -{} +{}, {} objects)",
                delta.base_digest,
                delta.removals.len(),
                delta.additions.len(),
                delta.objects.len()
            ),
        }
    }
}

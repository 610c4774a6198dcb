//! Peers: the remote side of a reconciliation.
//!
//! The engine keeps no per-peer memory of its own. Everything it needs to
//! remember between messages, which is just the last manifest it believes
//! the peer holds, lives behind the [`Peer`] trait.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use mansync_core::Manifest;

use crate::error::Result;

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

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

/// What we remember about a peer between messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerState {
    /// The peer this state belongs to.
    pub peer_id: PeerId,
    /// The manifest we last believed the peer holds, if any.
    pub last_known_manifest: Option<Manifest>,
}

impl PeerState {
    /// Fresh state for a peer we have never synced with.
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            last_known_manifest: None,
        }
    }

    /// Whether our belief about the peer matches `manifest`.
    pub fn is_in_sync_with(&self, manifest: &Manifest) -> bool {
        self.last_known_manifest.as_ref() == Some(manifest)
    }
}

/// A remote reconciliation partner.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Peer: Send + Sync {
    /// The peer's identity.
    fn peer_id(&self) -> PeerId;

    /// The manifest we last believed the peer holds.
    async fn last_known_manifest(&self) -> Option<Manifest>;

    /// Replace our belief about the peer's manifest.
    async fn set_last_known_manifest(&self, manifest: Option<Manifest>) -> Result<()>;

    /// Whether a message could be sent right now.
    fn can_send(&self) -> bool;

    /// Send encoded message bytes to the peer.
    async fn send(&self, bytes: Bytes) -> Result<()>;
}

//! Strong type definitions for mansync.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Width in bytes of every content digest.
///
/// Manifests are packed arrays of digests, so every manifest buffer is a
/// whole multiple of this size.
pub const DIGEST_SIZE: usize = 20;

/// A fixed-width content digest: the first [`DIGEST_SIZE`] bytes of a
/// Blake3 hash.
///
/// Digests identify objects (hash of the canonical object bytes) and
/// manifests (hash of the packed digest buffer). Ordering is plain byte
/// order, which is the order manifests keep their entries in.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; DIGEST_SIZE]);

impl Digest {
    /// Hash arbitrary bytes into a digest.
    pub fn of(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        let mut arr = [0u8; DIGEST_SIZE];
        arr.copy_from_slice(&hash.as_bytes()[..DIGEST_SIZE]);
        Self(arr)
    }

    /// Create a new Digest from raw bytes.
    pub const fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build a digest from a slice of exactly [`DIGEST_SIZE`] bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CoreError> {
        let arr: [u8; DIGEST_SIZE] = slice
            .try_into()
            .map_err(|_| CoreError::InvalidDigestLength(slice.len()))?;
        Ok(Self(arr))
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
        if bytes.len() != DIGEST_SIZE {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; DIGEST_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// The zero digest (used as a sentinel).
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
    type Error = CoreError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        Self::from_slice(slice)
    }
}

//! Error types for the store module.

use mansync_core::{CoreError, Digest};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A stored object could not be decoded.
    ///
    /// The digest identifies the damaged entry so callers can drop it and
    /// retry against a fresh manifest.
    #[error("corrupted object {digest}: {reason}")]
    Corruption { digest: Digest, reason: String },

    /// A manifest named an object the store does not hold.
    #[error("object not found: {0}")]
    NotFound(Digest),

    /// A lock guarding the store was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,

    /// Manifest arithmetic or canonical encoding failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl StoreError {
    /// Whether re-reading the manifest and trying again can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Corruption { .. } | StoreError::NotFound(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

//! Error types for mansync core.

use thiserror::Error;

use crate::types::{Digest, DIGEST_SIZE};

/// Core errors raised by manifest arithmetic and canonical encoding.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid manifest: length {len} is not a multiple of {DIGEST_SIZE}")]
    InvalidManifest { len: usize },

    #[error("patch conflict on {digest}: {reason}")]
    PatchConflict { digest: Digest, reason: PatchConflict },

    #[error("invalid digest length: expected {DIGEST_SIZE}, got {0}")]
    InvalidDigestLength(usize),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Why a manifest patch could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchConflict {
    /// An addition is already present in the base.
    AdditionPresent,
    /// A removal is not present in the base.
    RemovalAbsent,
}

impl std::fmt::Display for PatchConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchConflict::AdditionPresent => write!(f, "addition already present"),
            PatchConflict::RemovalAbsent => write!(f, "removal not present"),
        }
    }
}

impl CoreError {
    /// Whether this error reports a broken manifest invariant.
    ///
    /// Invariant errors mean a peer or the local store disagrees with the
    /// protocol's rules; the round is abandoned and the next digest
    /// comparison is expected to repair it.
    pub fn is_invariant(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidManifest { .. } | CoreError::PatchConflict { .. }
        )
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

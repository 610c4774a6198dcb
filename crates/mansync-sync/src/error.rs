//! Error types for the sync module.

use mansync_core::CoreError;
use mansync_store::StoreError;
use thiserror::Error;

/// Why an inbound message could not be decoded.
///
/// Decoding is all-or-nothing: any of these leaves the engine and the
/// peer's state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The message type is outside the known range.
    #[error("unknown message type {0}")]
    UnknownMessageType(i64),

    /// A SEQUENCE did not consume its whole buffer.
    #[error("{0} trailing bytes after message")]
    TrailingGarbage(usize),

    /// A field has the wrong tag, a non-minimal encoding or a bad length.
    #[error("malformed {field}: {reason}")]
    MalformedField { field: &'static str, reason: String },

    /// The objects payload is not an array of mappings.
    #[error("malformed objects: {0}")]
    MalformedObjects(String),

    /// A header or value runs past the end of the input.
    ///
    /// An outer length larger than the buffer lands here; one that leaves
    /// bytes over is [`DecodeError::TrailingGarbage`].
    #[error("truncated {0}")]
    Truncated(&'static str),
}

impl DecodeError {
    pub(crate) fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        DecodeError::MalformedField {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Inbound bytes were not a valid message.
    #[error("invalid message: {0}")]
    Decode(#[from] DecodeError),

    /// A manifest invariant was violated (bad patch, bad manifest).
    #[error("invariant violated: {0}")]
    Invariant(#[from] CoreError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Objects kept turning up corrupted while building a delta.
    #[error("gave up building delta after {attempts} corrupted attempts")]
    CorruptionRetriesExhausted { attempts: usize },

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer's stored state could not be read or written.
    #[error("peer state error: {0}")]
    PeerState(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

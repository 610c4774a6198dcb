//! Error types for the node facade.

use mansync_store::StoreError;
use mansync_sync::{PeerId, SyncError};
use thiserror::Error;

/// Errors that can occur during node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Reconciliation failed.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// No peer is registered under this ID.
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

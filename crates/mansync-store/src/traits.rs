//! DataSource trait: the abstract interface to the local object store.
//!
//! The sync engine never touches storage directly. It reads the current
//! manifest, fetches objects by digest, and hands received objects back
//! through this trait.

use async_trait::async_trait;
use mansync_core::{Digest, Manifest, Object};

use crate::error::Result;

/// Result of inserting an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Object was new and has been stored.
    Inserted,
    /// The exact object is already stored (idempotent - not an error).
    Duplicate,
    /// Object collided with a stored object on its primary key and the
    /// merge policy picked a winner.
    Merged,
    /// Object collided on its primary key and the policy had to fall back
    /// to its tie-breaker. Reported so it can be logged; never fatal.
    Conflict,
}

impl MergeOutcome {
    /// Whether the store's manifest may have changed.
    pub fn is_change(&self) -> bool {
        !matches!(self, MergeOutcome::Duplicate)
    }
}

/// The DataSource trait: async interface to the object set being synced.
///
/// # Design Notes
///
/// - **Consistent snapshots**: `current_manifest_digest` must always equal
///   the digest of what `current_manifest` returns at the same moment.
/// - **Self-identifying content**: objects are keyed by the digest of their
///   canonical encoding, so inserting the same object twice is harmless.
/// - **Corruption**: `objects_for` reports undecodable entries as
///   [`StoreError::Corruption`](crate::StoreError::Corruption) and callers
///   may drop them with `forget_object`.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// The full sorted set of digests currently held.
    async fn current_manifest(&self) -> Result<Manifest>;

    /// Digest of [`current_manifest`](Self::current_manifest).
    async fn current_manifest_digest(&self) -> Result<Digest> {
        Ok(self.current_manifest().await?.digest())
    }

    /// Fetch the objects named by `manifest`, in manifest order.
    async fn objects_for(&self, manifest: &Manifest) -> Result<Vec<Object>>;

    /// Insert a received object, merging it with any object sharing its
    /// primary key.
    async fn insert_or_merge(&self, object: Object) -> Result<MergeOutcome>;

    /// Drop an object so later manifests no longer list it.
    async fn forget_object(&self, digest: &Digest) -> Result<()> {
        let _ = digest;
        Ok(())
    }
}

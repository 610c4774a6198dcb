//! In-memory implementation of the DataSource trait.
//!
//! Objects are kept as canonical bytes keyed by digest, the same form they
//! are hashed in. The manifest and its digest are cached and replaced
//! together under the write lock, so readers always see a matching pair.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use mansync_core::{decode_object, Digest, Manifest, Object};

use crate::error::{Result, StoreError};
use crate::merge::{MergePolicy, PrimaryKey};
use crate::traits::{DataSource, MergeOutcome};

/// In-memory data source.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryDataSource {
    policy: MergePolicy,
    inner: RwLock<MemoryDataSourceInner>,
}

struct MemoryDataSourceInner {
    /// Canonical object bytes indexed by digest.
    objects: HashMap<Digest, Bytes>,

    /// Primary-key index: key -> digest of the current holder.
    primary_keys: HashMap<PrimaryKey, Digest>,

    /// Cached manifest of `objects`.
    manifest: Manifest,

    /// Cached digest of `manifest`.
    manifest_digest: Digest,
}

impl MemoryDataSourceInner {
    fn new() -> Self {
        let manifest = Manifest::empty();
        Self {
            objects: HashMap::new(),
            primary_keys: HashMap::new(),
            manifest_digest: manifest.digest(),
            manifest,
        }
    }

    /// Swap `removed` for `added` in the cached manifest.
    fn publish(&mut self, removed: Option<Digest>, added: Option<Digest>) -> Result<()> {
        let removals = Manifest::from_digests(removed);
        let additions = Manifest::from_digests(added);
        let manifest = self.manifest.patch(&removals, &additions)?;
        self.manifest_digest = manifest.digest();
        self.manifest = manifest;
        Ok(())
    }

    fn decode(&self, digest: &Digest) -> Result<Object> {
        let bytes = self.objects.get(digest).ok_or(StoreError::NotFound(*digest))?;
        decode_object(bytes).map_err(|e| StoreError::Corruption {
            digest: *digest,
            reason: e.to_string(),
        })
    }
}

impl MemoryDataSource {
    /// Create a new empty store with the default merge policy.
    pub fn new() -> Self {
        Self::with_policy(MergePolicy::default())
    }

    /// Create a new empty store with a custom merge policy.
    pub fn with_policy(policy: MergePolicy) -> Self {
        Self {
            policy,
            inner: RwLock::new(MemoryDataSourceInner::new()),
        }
    }

    /// The merge policy in use.
    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    /// Insert a locally created object.
    ///
    /// Same semantics as [`DataSource::insert_or_merge`], without needing
    /// an async context.
    pub fn insert_local(&self, object: Object) -> Result<MergeOutcome> {
        let mut inner = self.write()?;
        self.insert_locked(&mut inner, object)
    }

    /// Delete an object locally.
    ///
    /// Returns `false` if the object was not present.
    pub fn remove(&self, digest: &Digest) -> Result<bool> {
        let mut inner = self.write()?;
        Self::remove_locked(&mut inner, digest)
    }

    /// Look up an object by digest.
    pub fn get(&self, digest: &Digest) -> Result<Option<Object>> {
        let inner = self.read()?;
        if !inner.objects.contains_key(digest) {
            return Ok(None);
        }
        inner.decode(digest).map(Some)
    }

    /// Whether an object is stored.
    pub fn contains(&self, digest: &Digest) -> Result<bool> {
        Ok(self.read()?.objects.contains_key(digest))
    }

    /// Number of stored objects.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.objects.len())
    }

    /// True if no objects are stored.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Snapshot of the cached manifest without going through the trait.
    pub fn manifest(&self) -> Result<Manifest> {
        Ok(self.read()?.manifest.clone())
    }

    /// Overwrite the stored bytes of an object, leaving its digest listed.
    ///
    /// Test hook for exercising corruption handling. Returns `false` if the
    /// object was not present.
    pub fn inject_corruption(&self, digest: &Digest, bytes: impl Into<Bytes>) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.objects.get_mut(digest) {
            Some(stored) => {
                *stored = bytes.into();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryDataSourceInner>> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryDataSourceInner>> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }

    fn insert_locked(
        &self,
        inner: &mut MemoryDataSourceInner,
        object: Object,
    ) -> Result<MergeOutcome> {
        let digest = object.digest();

        if inner.objects.contains_key(&digest) {
            return Ok(MergeOutcome::Duplicate);
        }

        let key = self.policy.primary_key(&object);
        let holder = key.as_ref().and_then(|k| inner.primary_keys.get(k).copied());

        let Some(existing_digest) = holder else {
            Self::store_locked(inner, key, digest, &object)?;
            return Ok(MergeOutcome::Inserted);
        };

        let existing = match inner.decode(&existing_digest) {
            Ok(existing) => existing,
            Err(e) => {
                warn!(digest = %existing_digest, error = %e, "replacing undecodable object");
                Self::remove_locked(inner, &existing_digest)?;
                Self::store_locked(inner, key, digest, &object)?;
                return Ok(MergeOutcome::Merged);
            }
        };

        let (winner, outcome) = self.policy.merged_object(&existing, &object);
        if winner.digest() == digest {
            debug!(old = %existing_digest, new = %digest, "incoming object replaces existing");
            Self::remove_locked(inner, &existing_digest)?;
            Self::store_locked(inner, key, digest, &object)?;
        } else {
            debug!(kept = %existing_digest, dropped = %digest, "existing object kept");
        }
        Ok(outcome)
    }

    fn store_locked(
        inner: &mut MemoryDataSourceInner,
        key: Option<PrimaryKey>,
        digest: Digest,
        object: &Object,
    ) -> Result<()> {
        inner
            .objects
            .insert(digest, Bytes::from(object.canonical_bytes()));
        if let Some(key) = key {
            inner.primary_keys.insert(key, digest);
        }
        inner.publish(None, Some(digest))
    }

    fn remove_locked(inner: &mut MemoryDataSourceInner, digest: &Digest) -> Result<bool> {
        if inner.objects.remove(digest).is_none() {
            return Ok(false);
        }
        inner.primary_keys.retain(|_, holder| holder != digest);
        inner.publish(Some(*digest), None)?;
        Ok(true)
    }
}

impl Default for MemoryDataSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    async fn current_manifest(&self) -> Result<Manifest> {
        Ok(self.read()?.manifest.clone())
    }

    async fn current_manifest_digest(&self) -> Result<Digest> {
        Ok(self.read()?.manifest_digest)
    }

    async fn objects_for(&self, manifest: &Manifest) -> Result<Vec<Object>> {
        let inner = self.read()?;
        manifest
            .digests()
            .map(|digest| inner.decode(&digest))
            .collect()
    }

    async fn insert_or_merge(&self, object: Object) -> Result<MergeOutcome> {
        let mut inner = self.write()?;
        self.insert_locked(&mut inner, object)
    }

    async fn forget_object(&self, digest: &Digest) -> Result<()> {
        let mut inner = self.write()?;
        if Self::remove_locked(&mut inner, digest)? {
            warn!(%digest, "forgot object");
        }
        Ok(())
    }
}

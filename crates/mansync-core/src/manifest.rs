//! Manifest: the sorted set of object digests a party holds.
//!
//! A manifest is a packed buffer of [`DIGEST_SIZE`]-byte digests kept in
//! strictly ascending byte order. Because both sides of a comparison are
//! sorted, diffing and patching are single linear merges.

use std::cmp::Ordering;
use std::fmt;
use std::iter::Peekable;

use bytes::Bytes;

use crate::error::{CoreError, PatchConflict, Result};
use crate::types::{Digest, DIGEST_SIZE};

/// An immutable, sorted, deduplicated set of digests.
///
/// Two manifests are equal iff their backing buffers are byte-identical,
/// which (given the ordering invariant) is the same as set equality.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Manifest {
    bytes: Bytes,
}

/// The difference between a local manifest and one known to a peer.
///
/// `known.patch(&diff.removals, &diff.additions)` reconstructs the local
/// manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ManifestDiff {
    /// Digests the peer holds that the local side does not.
    pub removals: Manifest,
    /// Digests the local side holds that the peer does not.
    pub additions: Manifest,
}

impl ManifestDiff {
    /// True when both sides already hold the same set.
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty()
    }
}

impl Manifest {
    /// The empty manifest.
    pub fn empty() -> Self {
        Self { bytes: Bytes::new() }
    }

    /// Build a manifest from a raw packed buffer.
    ///
    /// Fails if the buffer length is not a multiple of [`DIGEST_SIZE`].
    /// Entries that are out of order or repeated are normalized.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() % DIGEST_SIZE != 0 {
            return Err(CoreError::InvalidManifest { len: bytes.len() });
        }

        let manifest = Self { bytes };
        if manifest.is_strictly_ascending() {
            Ok(manifest)
        } else {
            Ok(Self::from_digests(manifest.digests()))
        }
    }

    /// Build a manifest from any collection of digests.
    pub fn from_digests<I: IntoIterator<Item = Digest>>(digests: I) -> Self {
        let mut digests: Vec<Digest> = digests.into_iter().collect();
        digests.sort_unstable();
        digests.dedup();
        Self::from_sorted(&digests)
    }

    /// Pack digests that are already strictly ascending.
    fn from_sorted(digests: &[Digest]) -> Self {
        let mut buf = Vec::with_capacity(digests.len() * DIGEST_SIZE);
        for digest in digests {
            buf.extend_from_slice(&digest.0);
        }
        Self {
            bytes: Bytes::from(buf),
        }
    }

    fn is_strictly_ascending(&self) -> bool {
        self.bytes
            .chunks_exact(DIGEST_SIZE)
            .zip(self.bytes.chunks_exact(DIGEST_SIZE).skip(1))
            .all(|(a, b)| a < b)
    }

    /// Number of digests.
    pub fn len(&self) -> usize {
        self.bytes.len() / DIGEST_SIZE
    }

    /// True if the manifest holds no digests.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The packed backing buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A cheap handle to the packed backing buffer.
    pub fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    /// Digest of the whole manifest, used as its compact summary on the wire.
    pub fn digest(&self) -> Digest {
        Digest::of(&self.bytes)
    }

    /// Iterate the digests in ascending order.
    ///
    /// The iterator borrows the stored buffer; calling this again restarts
    /// from the beginning.
    pub fn digests(&self) -> Digests<'_> {
        Digests {
            chunks: self.bytes.chunks_exact(DIGEST_SIZE),
        }
    }

    /// The digest at `index`, if any.
    pub fn get(&self, index: usize) -> Option<Digest> {
        let start = index.checked_mul(DIGEST_SIZE)?;
        let end = start.checked_add(DIGEST_SIZE)?;
        let chunk = self.bytes.get(start..end)?;
        Digest::from_slice(chunk).ok()
    }

    /// Membership test by binary search.
    pub fn contains(&self, digest: &Digest) -> bool {
        let (mut lo, mut hi) = (0usize, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let start = mid * DIGEST_SIZE;
            match self.bytes[start..start + DIGEST_SIZE].cmp(&digest.0[..]) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return true,
            }
        }
        false
    }

    /// Collect the digests into a vector.
    pub fn to_vec(&self) -> Vec<Digest> {
        self.digests().collect()
    }

    /// Compare this (local) manifest with one known to a peer.
    pub fn diff(&self, known: &Manifest) -> ManifestDiff {
        let mut removals = Vec::new();
        let mut additions = Vec::new();

        let mut local = self.digests().peekable();
        let mut theirs = known.digests().peekable();

        loop {
            match (local.peek().copied(), theirs.peek().copied()) {
                (Some(ours), Some(peer)) => match ours.cmp(&peer) {
                    Ordering::Less => {
                        additions.push(ours);
                        local.next();
                    }
                    Ordering::Greater => {
                        removals.push(peer);
                        theirs.next();
                    }
                    Ordering::Equal => {
                        local.next();
                        theirs.next();
                    }
                },
                (Some(ours), None) => {
                    additions.push(ours);
                    local.next();
                }
                (None, Some(peer)) => {
                    removals.push(peer);
                    theirs.next();
                }
                (None, None) => break,
            }
        }

        ManifestDiff {
            removals: Self::from_sorted(&removals),
            additions: Self::from_sorted(&additions),
        }
    }

    /// Apply `removals` and then `additions` to this manifest.
    ///
    /// Every removal must be present and no addition may already be
    /// present; either violation is reported as a
    /// [`CoreError::PatchConflict`].
    pub fn patch(&self, removals: &Manifest, additions: &Manifest) -> Result<Manifest> {
        let mut kept = Vec::with_capacity(self.len());
        let mut pending_removals = removals.digests().peekable();

        for digest in self.digests() {
            match pending_removals.peek().copied() {
                Some(removal) if removal < digest => {
                    return Err(conflict(removal, PatchConflict::RemovalAbsent));
                }
                Some(removal) if removal == digest => {
                    pending_removals.next();
                }
                _ => kept.push(digest),
            }
        }
        if let Some(removal) = pending_removals.next() {
            return Err(conflict(removal, PatchConflict::RemovalAbsent));
        }

        let mut merged = Vec::with_capacity(kept.len() + additions.len());
        let mut pending_additions = additions.digests().peekable();

        for digest in kept {
            push_smaller(&mut merged, &mut pending_additions, &digest)?;
            merged.push(digest);
        }
        merged.extend(pending_additions);

        Ok(Self::from_sorted(&merged))
    }

    /// Select at most `max_count` digests to ship in one message.
    ///
    /// The window starts at the first digest greater than `after` and wraps
    /// around to the start, so successive calls that pass back the returned
    /// cursor walk the whole manifest. The cursor is the last digest taken
    /// in that walk, or `None` when everything fit.
    pub fn window_for_transfer(
        &self,
        after: Option<&Digest>,
        max_count: usize,
    ) -> (Manifest, Option<Digest>) {
        let len = self.len();
        let keep = max_count.min(len);
        if keep == len {
            return (self.clone(), None);
        }
        if keep == 0 {
            return (Self::empty(), None);
        }

        let start = match after.map(|d| self.upper_bound(d)) {
            Some(index) if index < len => index,
            _ => 0,
        };
        let end = start + keep;
        let bytes = if end <= len {
            self.bytes.slice(start * DIGEST_SIZE..end * DIGEST_SIZE)
        } else {
            // Wrapped: the head of the manifest sorts before the tail.
            let wrapped = end - len;
            let mut buf = Vec::with_capacity(keep * DIGEST_SIZE);
            buf.extend_from_slice(&self.bytes[..wrapped * DIGEST_SIZE]);
            buf.extend_from_slice(&self.bytes[start * DIGEST_SIZE..]);
            Bytes::from(buf)
        };

        (Self { bytes }, self.get((end - 1) % len))
    }

    /// Index of the first digest strictly greater than `digest`.
    fn upper_bound(&self, digest: &Digest) -> usize {
        let (mut lo, mut hi) = (0usize, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let start = mid * DIGEST_SIZE;
            if self.bytes[start..start + DIGEST_SIZE] <= digest.0[..] {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// The set union of two manifests.
    pub fn union(&self, other: &Manifest) -> Manifest {
        let mut merged = Vec::with_capacity(self.len() + other.len());
        let mut left = self.digests().peekable();
        let mut right = other.digests().peekable();

        loop {
            match (left.peek().copied(), right.peek().copied()) {
                (Some(a), Some(b)) => match a.cmp(&b) {
                    Ordering::Less => {
                        merged.push(a);
                        left.next();
                    }
                    Ordering::Greater => {
                        merged.push(b);
                        right.next();
                    }
                    Ordering::Equal => {
                        merged.push(a);
                        left.next();
                        right.next();
                    }
                },
                (Some(a), None) => {
                    merged.push(a);
                    left.next();
                }
                (None, Some(b)) => {
                    merged.push(b);
                    right.next();
                }
                (None, None) => break,
            }
        }

        Self::from_sorted(&merged)
    }
}

/// Move every pending addition smaller than `digest` into `out`.
fn push_smaller(
    out: &mut Vec<Digest>,
    additions: &mut Peekable<Digests<'_>>,
    digest: &Digest,
) -> Result<()> {
    while let Some(addition) = additions.peek().copied() {
        match addition.cmp(digest) {
            Ordering::Less => {
                out.push(addition);
                additions.next();
            }
            Ordering::Equal => return Err(conflict(addition, PatchConflict::AdditionPresent)),
            Ordering::Greater => break,
        }
    }
    Ok(())
}

fn conflict(digest: Digest, reason: PatchConflict) -> CoreError {
    CoreError::PatchConflict { digest, reason }
}

impl fmt::Debug for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Manifest[{}]", self.len())?;
        f.debug_list().entries(self.digests()).finish()
    }
}

impl FromIterator<Digest> for Manifest {
    fn from_iter<I: IntoIterator<Item = Digest>>(iter: I) -> Self {
        Self::from_digests(iter)
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = Digest;
    type IntoIter = Digests<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.digests()
    }
}

/// Iterator over the digests of a [`Manifest`].
#[derive(Clone)]
pub struct Digests<'a> {
    chunks: std::slice::ChunksExact<'a, u8>,
}

impl Iterator for Digests<'_> {
    type Item = Digest;

    fn next(&mut self) -> Option<Digest> {
        self.chunks.next().map(chunk_to_digest)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl DoubleEndedIterator for Digests<'_> {
    fn next_back(&mut self) -> Option<Digest> {
        self.chunks.next_back().map(chunk_to_digest)
    }
}

impl ExactSizeIterator for Digests<'_> {}

fn chunk_to_digest(chunk: &[u8]) -> Digest {
    let mut arr = [0u8; DIGEST_SIZE];
    arr.copy_from_slice(chunk);
    Digest(arr)
}

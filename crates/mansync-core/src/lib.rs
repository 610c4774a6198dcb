//! # mansync core
//!
//! Pure primitives for mansync: digests, manifests, objects, and their
//! canonical encoding.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over content-addressed data.
//!
//! ## Key Types
//!
//! - [`Digest`] - Fixed-width content identifier (truncated Blake3)
//! - [`Manifest`] - Sorted, deduplicated set of digests with diff/patch
//! - [`Object`] - Property map whose identity is its canonical digest
//!
//! ## Canonicalization
//!
//! Objects are encoded using deterministic CBOR. See [`canonical`] module.

pub mod canonical;
pub mod error;
pub mod manifest;
pub mod object;
pub mod types;

pub use canonical::{canonical_bytes, decode_object, decode_object_array, encode_object_array};
pub use error::{CoreError, PatchConflict, Result};
pub use manifest::{Digests, Manifest, ManifestDiff};
pub use object::{Object, ObjectBuilder, Value};
pub use types::{Digest, DIGEST_SIZE};

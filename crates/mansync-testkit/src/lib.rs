//! # mansync testkit
//!
//! Testing utilities for mansync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Wire encodings every implementation must reproduce byte for byte
//! - **Generators**: Proptest strategies for digests, manifests, objects and messages
//! - **Fixtures**: Object factories and a fully meshed cluster of in-memory nodes
//!
//! ## Golden Vectors
//!
//! ```rust
//! use mansync_testkit::vectors::verify_all_vectors;
//!
//! for (name, ok, hex) in verify_all_vectors() {
//!     assert!(ok, "{}: {}", name, hex);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use mansync_testkit::generators::arb_message;
//!
//! proptest! {
//!     #[test]
//!     fn codec_roundtrip(message in arb_message()) {
//!         let bytes = mansync_sync::encode(&message);
//!         prop_assert_eq!(mansync_sync::decode(&bytes).unwrap(), message);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use mansync_testkit::fixtures::{objects, TestCluster};
//!
//! let mut cluster = TestCluster::new(3).await;
//! cluster.seed(0, objects("a", 10));
//! cluster.sync_and_settle().await;
//! assert!(cluster.is_converged().await);
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{
    item, objects, populated_source, random_placement, version, TestCluster, TestNode,
};
pub use generators::{arb_digest, arb_manifest, arb_message, arb_object, arb_value};
pub use vectors::{all_vectors, verify_all_vectors, GoldenVector};

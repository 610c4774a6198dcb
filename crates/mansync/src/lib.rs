//! # mansync
//!
//! The unified API for mansync: object stores that converge by exchanging
//! manifests of content digests.
//!
//! ## Overview
//!
//! mansync provides a transport-agnostic library for:
//!
//! - **Objects**: Attribute maps identified by the digest of their canonical encoding
//! - **Manifests**: Sorted sets of object digests, summarized by a single digest
//! - **Deltas**: Manifest differences shipped together with the missing objects
//! - **Sync**: Convergence of object sets across any number of peers
//!
//! ## Key Concepts
//!
//! - **Digest**: 20 bytes of BLAKE3 over the canonical encoding.
//! - **Last known manifest**: The only thing remembered about a peer.
//! - **Merge policy**: Decides between two objects with the same primary key.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mansync::{MemoryDataSource, MemoryNetwork, NodeConfig, Object, PeerId, SyncNode};
//!
//! async fn example() -> mansync::Result<()> {
//!     let network = MemoryNetwork::new();
//!     let (a_id, b_id) = (PeerId::random(), PeerId::random());
//!     let mut inbox = network.join(a_id).await;
//!
//!     let node = SyncNode::new(a_id, Arc::new(MemoryDataSource::new()), NodeConfig::default());
//!     node.add_peer(Arc::new(network.peer(a_id, b_id))).await;
//!     node.insert(Object::builder().attr("key", "a").date("mdat", 1).build()).await?;
//!
//!     node.sync_all(false).await;
//!     node.pump_until_quiet(&mut inbox).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `mansync::core` - Core primitives (Digest, Manifest, Object)
//! - `mansync::store` - Data source abstraction and merge policy
//! - `mansync::sync` - Wire codec and reconciliation engine

pub mod error;
pub mod node;

// Re-export component crates
pub use mansync_core as core;
pub use mansync_store as store;
pub use mansync_sync as sync;

// Re-export main types for convenience
pub use error::{NodeError, Result};
pub use node::{NodeConfig, PumpReport, SyncAllReport, SyncNode};

// Re-export commonly used types
pub use mansync_core::{Digest, Manifest, ManifestDiff, Object, ObjectBuilder, Value};
pub use mansync_store::{DataSource, MemoryDataSource, MergeOutcome, MergePolicy};
pub use mansync_sync::{
    verify_convergence, ConvergenceResult, EngineConfig, Inbox, MemoryNetwork, MemoryPeer, Peer,
    PeerId, SyncEngine, SyncError,
};

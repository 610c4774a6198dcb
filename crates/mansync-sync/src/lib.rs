//! # mansync sync
//!
//! Set reconciliation between object stores.
//!
//! ## Overview
//!
//! Two peers converge by exchanging, in order of cost, the digest of their
//! manifest, the manifest itself, and a delta carrying the objects the
//! other side lacks. The [`SyncEngine`] picks the cheapest message that
//! moves the conversation forward; it keeps no session state beyond the
//! last manifest it believes each [`Peer`] holds.
//!
//! ## Key Properties
//!
//! - **Idempotent**: Replayed messages are harmless
//! - **Self-correcting**: A stale belief about a peer costs one full manifest
//! - **Bounded**: Deltas carry at most a configured number of objects
//! - **Atomic decode**: Malformed input never changes state
//!
//! ## Message Flow
//!
//! ```text
//! Node E {o1, o2}                     Node P {}
//!   |-------- ManifestDigest(E) ------->|
//!   |<------- Manifest({}) -------------|
//!   |-------- Delta(+o1 +o2, objects) ->|
//!   |<------- ManifestDigest(E) --------|
//! ```

pub mod codec;
pub mod convergence;
pub mod der;
pub mod engine;
pub mod error;
pub mod messages;
pub mod peer;
pub mod transport;

pub use codec::{decode, describe_message, encode};
pub use convergence::{compare_manifests, verify_convergence, verify_group, ConvergenceResult};
pub use engine::{ApplyReport, EngineConfig, SyncEngine};
pub use error::{DecodeError, Result, SyncError};
pub use messages::{limits, ManifestDelta, Message, MessageType};
pub use peer::{Peer, PeerId, PeerState};
pub use transport::{Envelope, Inbox, MemoryNetwork, MemoryPeer};

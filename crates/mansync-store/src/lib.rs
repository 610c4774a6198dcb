//! # mansync store
//!
//! Storage abstraction for mansync. Provides the [`DataSource`] trait the
//! sync engine reads from and writes to, the [`MergePolicy`] that resolves
//! primary-key collisions, and an in-memory implementation.
//!
//! ## Key Types
//!
//! - [`DataSource`] - The async trait for all object-store operations
//! - [`MemoryDataSource`] - Thread-safe in-memory store
//! - [`MergeOutcome`] - Result of inserting an object
//! - [`MergePolicy`] - Primary key and modification-date rules
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: Inserting the same object twice returns `Duplicate`
//! - **Collision handling**: Objects sharing a primary key are merged, never both kept
//! - **Corruption**: Undecodable entries are reported by digest and can be forgotten

pub mod error;
pub mod memory;
pub mod merge;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryDataSource;
pub use merge::{MergePolicy, PrimaryKey, DEFAULT_MODIFICATION_DATE, DEFAULT_PRIMARY_KEY};
pub use traits::{DataSource, MergeOutcome};

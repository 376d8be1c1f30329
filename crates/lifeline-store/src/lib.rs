//! Storage collaborator for the Lifeline persistence engine.
//!
//! The engine never touches bytes on disk itself. It resolves a node's
//! [`PathBuilder`](lifeline_path::PathBuilder) and hands a [`StoredRecord`]
//! to a [`Storage`] implementation keyed by that path.
//!
//! # Storage Backends
//!
//! - [`InMemoryStore`] -- `BTreeMap`-based store for tests and embedding,
//!   with an operation log for asserting exactly which calls were made.
//!
//! # Design Rules
//!
//! 1. A record lives at exactly one path; saving to the same path overwrites.
//! 2. Deleting a node also removes the records nested below its path.
//! 3. Elements saved separately are children one `/` below their container.
//! 4. The store never interprets record contents beyond the bulk helpers.
//! 5. All backend errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod record;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryStore, StoreOp};
pub use record::StoredRecord;
pub use traits::{child_key, Storage};

//! The Lifeline persistence engine.
//!
//! Persists a mutable in-memory object graph to a key-addressed
//! [`Storage`](lifeline_store::Storage), writing only the nodes that changed,
//! either synchronously or through a coalescing job queue.
//!
//! # Components
//!
//! - [`node`] / [`graph`] -- the savable node contract and parent-chain walks
//! - [`list`], [`array`], [`map`] -- observable containers that turn each
//!   mutation into a [`Change`] and route it to per-element storage calls
//! - [`serializer`] -- fresh and relative save/read/delete/has operations
//! - [`queue`] / [`job`] -- at most one pending job per path, cancellable
//! - [`pool`] -- bounded object pool for path buffers
//!
//! # Design Rules
//!
//! 1. A node that is not dirty is never written.
//! 2. Synchronous operations drain the job queue first, so they observe every
//!    earlier asynchronous write.
//! 3. The serializer's scratch path is taken fail-fast; re-entrant
//!    synchronous use is an error, never a deadlock.
//! 4. Parent links are weak; detaching a node never deletes its data.
//! 5. Backend errors are propagated unchanged.

pub mod array;
pub mod change;
pub mod config;
pub mod container;
pub mod convert;
pub mod element;
pub mod error;
pub mod graph;
pub mod id;
pub mod job;
pub mod list;
pub mod map;
pub mod node;
pub mod pool;
pub mod queue;
pub mod serializer;

#[cfg(test)]
mod fixtures;

pub use array::ObservableArray;
pub use change::{Change, ChangeKind, Items};
pub use config::{SavePolicy, SerializerConfig};
pub use container::{Container, ContainerCore, ListenerId};
pub use convert::{IdConverter, IdConverters, ParseConverter};
pub use element::Element;
pub use error::{SaveError, SaveResult};
pub use id::{IdGenerator, SequenceIdGenerator, UuidIdGenerator};
pub use job::{JobHandle, QueuedJob};
pub use list::ObservableList;
pub use map::ObservableMap;
pub use node::{AsNode, NodeHeader, Propagation, Restore, Savable};
pub use pool::{ObjectPool, Pooled};
pub use queue::JobQueue;
pub use serializer::{Serializer, SerializerBuilder};

pub use lifeline_path::{PathBuilder, PathKind};

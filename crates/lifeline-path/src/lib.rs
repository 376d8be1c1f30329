//! Hierarchical save paths for the Lifeline persistence engine.
//!
//! Every persisted node is addressed by the chain of identities leading from
//! its root down to the node itself. Each step is tagged by how the node was
//! reached from its parent:
//!
//! - [`PathKind::Property`] -- joined with `.` (a field of the parent)
//! - [`PathKind::Collection`] -- joined with `/` (an element of a container)
//!
//! A player `p1` owning a list `items` whose first element is `0` therefore
//! lives at `p1/items/0`, and a nested stats object at `p1.stats`.
//!
//! [`PathBuilder`] is a reusable, bounded buffer with a stack of segment
//! boundaries. Push/pop mirror a recursive walk of the graph without
//! allocating a new string per step.

pub mod builder;
pub mod error;

pub use builder::{PathBuilder, PathKind, Segments, DEFAULT_MAX_LEN};
pub use error::{PathError, PathResult};

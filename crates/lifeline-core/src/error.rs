//! Error types for the persistence engine.

use lifeline_path::PathError;
use lifeline_store::StoreError;
use thiserror::Error;

/// Errors raised by nodes, containers, the serializer and the job queue.
///
/// `Clone` so the outcome of one coalesced job can be handed to every
/// caller whose request was folded into it.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SaveError {
    /// Building or walking a save path failed.
    #[error("path error: {0}")]
    Path(#[from] PathError),

    /// The storage collaborator failed; passed through unchanged.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The node needs an id for this operation and has none.
    #[error("node has no id")]
    EmptyId,

    /// A top-level operation resolved to an empty path.
    #[error("resolved save path is empty")]
    EmptyPath,

    /// The parent chain is longer than the walk limit, most likely a cycle.
    #[error("parent chain exceeds {0} hops")]
    ParentChainTooDeep(usize),

    /// The serializer's scratch path is held by another fresh operation.
    #[error("scratch path builder is already in use")]
    PathBuilderBusy,

    /// The container does not support this mutation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Index outside the bounds of a container.
    #[error("index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A map key type has no registered id converter.
    #[error("no id converter registered for {0}")]
    MissingConverter(&'static str),

    /// A stored id could not be converted back into a key.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// An order-sensitive element's order does not match its position.
    #[error("element at index {index} carries order {order:?}")]
    OrderMismatch { index: usize, order: Option<usize> },

    /// The job was cancelled before it ran.
    #[error("job was cancelled")]
    Cancelled,

    /// A job was joined twice.
    #[error("job already joined another job")]
    AlreadyJoined,

    /// Two jobs with different result types were queued on the same path.
    #[error("conflicting job kinds queued for path {0}")]
    JobKindMismatch(String),

    /// The job was dropped without ever producing a result.
    #[error("job was dropped before completing")]
    Abandoned,

    /// The serializer that queued a job no longer exists.
    #[error("serializer was dropped")]
    SerializerDropped,

    /// A record could not be converted to or from a value.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for engine operations.
pub type SaveResult<T> = Result<T, SaveError>;

impl From<serde_json::Error> for SaveError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

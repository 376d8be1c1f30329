//! Error types for path construction.

use thiserror::Error;

/// Errors raised while building or parsing a save path.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PathError {
    /// A segment with no text was pushed or parsed.
    #[error("path segment must not be empty")]
    EmptySegment,

    /// Pushing the segment would grow the path past its capacity.
    #[error("path length {needed} exceeds capacity {max_len}")]
    CapacityExceeded { needed: usize, max_len: usize },

    /// Pop or segment access on a path with too few segments.
    #[error("path has no segment at {index} (segment count {count})")]
    NoSegment { index: usize, count: usize },

    /// `copy_to` target already holds segments.
    #[error("copy target is not empty: {0:?}")]
    TargetNotEmpty(String),

    /// `copy_to` target has a smaller capacity than the source.
    #[error("copy target capacity {target} is smaller than source capacity {source_len}")]
    TargetTooSmall { target: usize, source_len: usize },
}

/// Convenience alias used throughout the path crate.
pub type PathResult<T> = std::result::Result<T, PathError>;

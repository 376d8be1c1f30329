use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{PathError, PathResult};

/// Default capacity of a path buffer, in bytes.
pub const DEFAULT_MAX_LEN: usize = 1024;

/// How a node was reached from its parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathKind {
    /// A field of the parent, joined with `.`.
    Property,
    /// An element of a container, joined with `/`.
    Collection,
}

impl PathKind {
    /// The separator written in front of a segment of this kind.
    pub const fn separator(self) -> char {
        match self {
            Self::Property => '.',
            Self::Collection => '/',
        }
    }

    /// Map a separator character back to its kind.
    pub const fn from_separator(ch: char) -> Option<Self> {
        match ch {
            '.' => Some(Self::Property),
            '/' => Some(Self::Collection),
            _ => None,
        }
    }
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property => write!(f, "property"),
            Self::Collection => write!(f, "collection"),
        }
    }
}

/// Byte range of one segment inside the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Segment {
    kind: PathKind,
    start: usize,
    end: usize,
}

/// Mutable, bounded builder for hierarchical save paths.
///
/// The buffer is allocated once with the full capacity and reused: `push`
/// appends a separator (only when the path is not empty) followed by the
/// segment text, and `pop` truncates back to exactly the length the path had
/// before the matching `push`.
///
/// Equality and hashing consider only the rendered text, so two builders
/// that spell the same path compare equal regardless of capacity.
#[derive(Clone)]
pub struct PathBuilder {
    buf: String,
    segments: Vec<Segment>,
    max_len: usize,
}

impl PathBuilder {
    /// Create an empty builder with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_LEN)
    }

    /// Create an empty builder holding at most `max_len` bytes.
    pub fn with_capacity(max_len: usize) -> Self {
        Self {
            buf: String::with_capacity(max_len),
            segments: Vec::new(),
            max_len,
        }
    }

    /// Rebuild a builder from a rendered path such as `p1/items/0`.
    ///
    /// The first segment is tagged [`PathKind::Property`]; every following
    /// segment takes the kind of the separator in front of it.
    pub fn parse(text: &str) -> PathResult<Self> {
        Self::parse_with_capacity(text, DEFAULT_MAX_LEN.max(text.len()))
    }

    /// Like [`Self::parse`], with an explicit capacity.
    pub fn parse_with_capacity(text: &str, max_len: usize) -> PathResult<Self> {
        let mut path = Self::with_capacity(max_len);
        if text.is_empty() {
            return Ok(path);
        }
        let mut kind = PathKind::Property;
        let mut start = 0;
        for (i, ch) in text.char_indices() {
            if let Some(next) = PathKind::from_separator(ch) {
                path.push(&text[start..i], kind)?;
                kind = next;
                start = i + ch.len_utf8();
            }
        }
        path.push(&text[start..], kind)?;
        Ok(path)
    }

    /// Append a segment. Fails on empty text or when capacity would be exceeded;
    /// on failure the builder is left unchanged.
    pub fn push(&mut self, text: &str, kind: PathKind) -> PathResult<&mut Self> {
        if text.is_empty() {
            return Err(PathError::EmptySegment);
        }
        let separator = usize::from(!self.segments.is_empty());
        let needed = self.buf.len() + separator + text.len();
        if needed > self.max_len {
            return Err(PathError::CapacityExceeded {
                needed,
                max_len: self.max_len,
            });
        }
        if separator == 1 {
            self.buf.push(kind.separator());
        }
        let start = self.buf.len();
        self.buf.push_str(text);
        self.segments.push(Segment {
            kind,
            start,
            end: self.buf.len(),
        });
        Ok(self)
    }

    /// Remove the last segment, returning the kind it was pushed with.
    pub fn pop(&mut self) -> PathResult<PathKind> {
        self.pop_with(|_, kind| kind)
    }

    /// Remove the last segment, handing its text to `f` before truncation.
    ///
    /// This is the non-allocating way to inspect a popped segment.
    pub fn pop_with<R>(&mut self, f: impl FnOnce(&str, PathKind) -> R) -> PathResult<R> {
        let last = *self.segments.last().ok_or(PathError::NoSegment {
            index: 0,
            count: 0,
        })?;
        let out = f(&self.buf[last.start..last.end], last.kind);
        self.segments.pop();
        let restored = if self.segments.is_empty() {
            0
        } else {
            last.start - 1
        };
        self.buf.truncate(restored);
        Ok(out)
    }

    /// Remove the last segment and return its text as an owned string.
    pub fn pop_string(&mut self) -> PathResult<String> {
        self.pop_with(|text, _| text.to_owned())
    }

    /// The full rendered path.
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    /// Returns `true` if the path holds no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Current length of the rendered path in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Number of segments currently pushed.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Maximum rendered length in bytes.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Text of the segment at `index`, counted from the root.
    pub fn segment(&self, index: usize) -> PathResult<&str> {
        self.segments
            .get(index)
            .map(|seg| &self.buf[seg.start..seg.end])
            .ok_or(PathError::NoSegment {
                index,
                count: self.segments.len(),
            })
    }

    /// Text of the segment `n` positions from the end; `1` is the last one.
    pub fn segment_from_end(&self, n: usize) -> PathResult<&str> {
        let count = self.segments.len();
        if n == 0 || n > count {
            return Err(PathError::NoSegment { index: n, count });
        }
        self.segment(count - n)
    }

    /// Kind of the segment at `index`.
    pub fn segment_kind(&self, index: usize) -> PathResult<PathKind> {
        self.segments
            .get(index)
            .map(|seg| seg.kind)
            .ok_or(PathError::NoSegment {
                index,
                count: self.segments.len(),
            })
    }

    /// The last segment, if any.
    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(|seg| &self.buf[seg.start..seg.end])
    }

    /// Iterate over `(text, kind)` pairs from the root down.
    pub fn segments(&self) -> Segments<'_> {
        Segments {
            path: self,
            index: 0,
        }
    }

    /// Duplicate this path into `target`.
    ///
    /// The target must be empty and at least as large as this builder.
    pub fn copy_to(&self, target: &mut PathBuilder) -> PathResult<()> {
        if !target.is_empty() {
            return Err(PathError::TargetNotEmpty(target.buf.clone()));
        }
        if target.max_len < self.max_len {
            return Err(PathError::TargetTooSmall {
                target: target.max_len,
                source_len: self.max_len,
            });
        }
        target.buf.clear();
        target.buf.push_str(&self.buf);
        target.segments.clear();
        target.segments.extend_from_slice(&self.segments);
        Ok(())
    }

    /// Drop every segment, keeping the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.segments.clear();
    }
}

impl Default for PathBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for PathBuilder {
    fn eq(&self, other: &Self) -> bool {
        self.buf == other.buf
    }
}

impl Eq for PathBuilder {}

impl Hash for PathBuilder {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.buf.hash(state);
    }
}

impl AsRef<str> for PathBuilder {
    fn as_ref(&self) -> &str {
        &self.buf
    }
}

impl fmt::Display for PathBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buf)
    }
}

impl fmt::Debug for PathBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathBuilder")
            .field("path", &self.buf)
            .field("segments", &self.segments.len())
            .field("max_len", &self.max_len)
            .finish()
    }
}

/// Iterator over the segments of a [`PathBuilder`].
pub struct Segments<'a> {
    path: &'a PathBuilder,
    index: usize,
}

impl<'a> Iterator for Segments<'a> {
    type Item = (&'a str, PathKind);

    fn next(&mut self) -> Option<Self::Item> {
        let seg = self.path.segments.get(self.index)?;
        self.index += 1;
        Some((&self.path.buf[seg.start..seg.end], seg.kind))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.path.segments.len() - self.index;
        (rest, Some(rest))
    }
}

impl ExactSizeIterator for Segments<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn player_item() -> PathBuilder {
        let mut path = PathBuilder::new();
        path.push("p1", PathKind::Property)
            .unwrap()
            .push("items", PathKind::Collection)
            .unwrap()
            .push("0", PathKind::Collection)
            .unwrap();
        path
    }

    #[test]
    fn separators_follow_kind() {
        let mut path = player_item();
        assert_eq!(path.as_str(), "p1/items/0");

        path.pop().unwrap();
        path.push("stats", PathKind::Property).unwrap();
        assert_eq!(path.as_str(), "p1/items.stats");
    }

    #[test]
    fn first_segment_has_no_separator() {
        let mut path = PathBuilder::new();
        path.push("root", PathKind::Collection).unwrap();
        assert_eq!(path.as_str(), "root");
    }

    #[test]
    fn pop_restores_previous_length() {
        let mut path = player_item();
        let before = (path.len(), path.segment_count());
        path.push("extra", PathKind::Property).unwrap();
        assert_eq!(path.pop().unwrap(), PathKind::Property);
        assert_eq!((path.len(), path.segment_count()), before);
        assert_eq!(path.as_str(), "p1/items/0");
    }

    #[test]
    fn pop_last_segment_empties_buffer() {
        let mut path = PathBuilder::new();
        path.push("solo", PathKind::Property).unwrap();
        assert_eq!(path.pop_string().unwrap(), "solo");
        assert!(path.is_empty());
        assert_eq!(path.len(), 0);
    }

    #[test]
    fn pop_on_empty_fails() {
        let mut path = PathBuilder::new();
        assert!(matches!(path.pop(), Err(PathError::NoSegment { .. })));
    }

    #[test]
    fn pop_with_sees_segment_text() {
        let mut path = player_item();
        let seen = path
            .pop_with(|text, kind| format!("{kind}:{text}"))
            .unwrap();
        assert_eq!(seen, "collection:0");
        assert_eq!(path.as_str(), "p1/items");
    }

    #[test]
    fn empty_segment_rejected() {
        let mut path = PathBuilder::new();
        assert_eq!(
            path.push("", PathKind::Property).unwrap_err(),
            PathError::EmptySegment
        );
    }

    #[test]
    fn push_past_capacity_fails_and_leaves_path_intact() {
        let mut path = PathBuilder::with_capacity(8);
        path.push("abcd", PathKind::Property).unwrap();
        let err = path.push("efgh", PathKind::Collection).unwrap_err();
        assert_eq!(
            err,
            PathError::CapacityExceeded {
                needed: 9,
                max_len: 8
            }
        );
        assert_eq!(path.as_str(), "abcd");
        assert_eq!(path.segment_count(), 1);

        path.push("efg", PathKind::Collection).unwrap();
        assert_eq!(path.len(), 8);
    }

    #[test]
    fn segment_access_from_both_ends() {
        let path = player_item();
        assert_eq!(path.segment(0).unwrap(), "p1");
        assert_eq!(path.segment(2).unwrap(), "0");
        assert_eq!(path.segment_from_end(1).unwrap(), "0");
        assert_eq!(path.segment_from_end(3).unwrap(), "p1");
        assert!(path.segment(3).is_err());
        assert!(path.segment_from_end(0).is_err());
        assert!(path.segment_from_end(4).is_err());
        assert_eq!(path.segment_kind(1).unwrap(), PathKind::Collection);
        assert_eq!(path.last_segment(), Some("0"));
    }

    #[test]
    fn copy_to_duplicates_segments() {
        let source = player_item();
        let mut target = PathBuilder::new();
        source.copy_to(&mut target).unwrap();
        assert_eq!(target, source);
        assert_eq!(target.segment_count(), 3);

        target.pop().unwrap();
        assert_eq!(target.as_str(), "p1/items");
        assert_eq!(source.as_str(), "p1/items/0");
    }

    #[test]
    fn copy_to_rejects_non_empty_target() {
        let source = player_item();
        let mut target = PathBuilder::new();
        target.push("x", PathKind::Property).unwrap();
        assert!(matches!(
            source.copy_to(&mut target),
            Err(PathError::TargetNotEmpty(_))
        ));
    }

    #[test]
    fn copy_to_rejects_smaller_target() {
        let source = player_item();
        let mut target = PathBuilder::with_capacity(16);
        assert_eq!(
            source.copy_to(&mut target).unwrap_err(),
            PathError::TargetTooSmall {
                target: 16,
                source_len: DEFAULT_MAX_LEN
            }
        );
    }

    #[test]
    fn equality_and_hash_ignore_capacity() {
        let a = player_item();
        let mut b = PathBuilder::with_capacity(4096);
        b.push("p1", PathKind::Property)
            .unwrap()
            .push("items", PathKind::Collection)
            .unwrap()
            .push("0", PathKind::Collection)
            .unwrap();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn parse_recovers_segments_and_kinds() {
        let path = PathBuilder::parse("save.player/items/3.stats").unwrap();
        let segments: Vec<_> = path.segments().collect();
        assert_eq!(
            segments,
            vec![
                ("save", PathKind::Property),
                ("player", PathKind::Property),
                ("items", PathKind::Collection),
                ("3", PathKind::Collection),
                ("stats", PathKind::Property),
            ]
        );
        assert_eq!(path.as_str(), "save.player/items/3.stats");
    }

    #[test]
    fn parse_rejects_empty_segments() {
        assert_eq!(
            PathBuilder::parse("a//b").unwrap_err(),
            PathError::EmptySegment
        );
        assert!(PathBuilder::parse("").unwrap().is_empty());
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut path = player_item();
        path.clear();
        assert!(path.is_empty());
        assert_eq!(path.max_len(), DEFAULT_MAX_LEN);
        path.push("again", PathKind::Property).unwrap();
        assert_eq!(path.as_str(), "again");
    }

    #[derive(Clone, Debug)]
    enum Op {
        Push(String, bool),
        Pop,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            ("[a-z0-9]{1,6}", any::<bool>()).prop_map(|(s, c)| Op::Push(s, c)),
            Just(Op::Pop),
        ]
    }

    proptest! {
        #[test]
        fn push_pop_is_stack_disciplined(ops in prop::collection::vec(op(), 0..64)) {
            let mut path = PathBuilder::with_capacity(128);
            let mut lengths: Vec<usize> = Vec::new();
            for op in ops {
                match op {
                    Op::Push(text, collection) => {
                        let kind = if collection { PathKind::Collection } else { PathKind::Property };
                        let before = path.len();
                        if path.push(&text, kind).is_ok() {
                            lengths.push(before);
                        } else {
                            prop_assert_eq!(path.len(), before);
                        }
                    }
                    Op::Pop => match lengths.pop() {
                        Some(before) => {
                            path.pop().unwrap();
                            prop_assert_eq!(path.len(), before);
                        }
                        None => prop_assert!(path.pop().is_err()),
                    },
                }
                prop_assert_eq!(path.segment_count(), lengths.len());
                let reparsed = PathBuilder::parse(path.as_str()).unwrap();
                prop_assert_eq!(reparsed.segment_count(), path.segment_count());
            }
        }
    }
}

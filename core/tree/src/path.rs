//! Typed, slash-separated addresses into the shared tree.

use std::fmt;

use crate::store::TreeError;

/// An address in the shared tree, e.g. `devices/abc/control/global_mode`.
///
/// Paths are sequences of non-empty segments. The empty path is the tree
/// root. Paths order lexicographically by segment, so collections keyed by
/// `TreePath` iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TreePath {
    segments: Vec<String>,
}

impl TreePath {
    /// The tree root (no segments).
    pub fn root() -> Self {
        TreePath::default()
    }

    /// Parses a slash-separated path. Leading, trailing, and doubled
    /// slashes are rejected rather than silently collapsed, since such
    /// paths are almost always caller bugs.
    pub fn parse(raw: &str) -> Result<Self, TreeError> {
        if raw.is_empty() {
            return Ok(TreePath::root());
        }
        let segments: Vec<String> = raw.split('/').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(TreeError::InvalidPath(raw.to_string()));
        }
        Ok(TreePath { segments })
    }

    /// Appends one segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let segment = segment.into();
        debug_assert!(!segment.is_empty(), "empty path segment");
        debug_assert!(!segment.contains('/'), "segment contains '/'");
        let mut segments = self.segments.clone();
        segments.push(segment);
        TreePath { segments }
    }

    /// Appends all segments of `other`.
    pub fn join(&self, other: &TreePath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        TreePath { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The path without its last segment, or `None` for the root.
    pub fn parent(&self) -> Option<TreePath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(TreePath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// The last segment, or `None` for the root.
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// True if `prefix` is an ancestor of (or equal to) this path.
    pub fn starts_with(&self, prefix: &TreePath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// True if the two paths address overlapping subtrees, i.e. one is an
    /// ancestor of the other. A mutation at one of two overlapping paths is
    /// visible to a subscriber at the other.
    pub fn overlaps(&self, other: &TreePath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

//! Hierarchical store paths.
//!
//! A [`StorePath`] is a validated sequence of non-empty segments, rendered
//! as `a/b/c`.  Segments may not contain `/`, so a path always round-trips
//! through its string form unambiguously.

use crate::error::{Result, StoreError};

/// A location in the hierarchical store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// The root of the store (empty path).
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Build a path from segments, validating each one.
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut path = Self::root();
        for seg in segments {
            path = path.child(seg)?;
        }
        Ok(path)
    }

    /// Parse a `a/b/c` string into a path.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        Self::new(s.split('/'))
    }

    /// Extend the path with one more segment.
    pub fn child(&self, segment: impl Into<String>) -> Result<Self> {
        let segment = segment.into();
        if segment.is_empty() {
            return Err(StoreError::InvalidPath("empty segment".to_string()));
        }
        if segment.contains('/') {
            return Err(StoreError::InvalidPath(format!(
                "segment '{segment}' contains '/'"
            )));
        }
        let mut segments = self.segments.clone();
        segments.push(segment);
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether `self` is `other` or an ancestor of it.
    ///
    /// Watch dispatch uses this in both directions: a write below a watched
    /// path changes the watched snapshot, and a write at an ancestor
    /// replaces the watched subtree.
    pub fn is_prefix_of(&self, other: &StorePath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Whether a write at `changed` affects the value seen at `self`.
    pub fn overlaps(&self, changed: &StorePath) -> bool {
        self.is_prefix_of(changed) || changed.is_prefix_of(self)
    }
}

impl std::fmt::Display for StorePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

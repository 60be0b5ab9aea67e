//! Hierarchical store paths.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// A normalized slash-separated path into the store tree.
///
/// The empty path addresses the root. Segments are non-empty and may not
/// contain `/`; no leading or trailing slashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path(String);

impl Path {
    /// The root of the tree.
    pub fn root() -> Self {
        Path(String::new())
    }

    /// Parse a path. The empty string is the root.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, StoreError> {
        let raw = raw.as_ref();
        if raw.is_empty() {
            return Ok(Self::root());
        }
        if raw.split('/').any(|segment| segment.is_empty()) {
            return Err(StoreError::InvalidPath(raw.to_string()));
        }
        Ok(Path(raw.to_string()))
    }

    /// Append one segment.
    pub fn join(&self, segment: &str) -> Result<Self, StoreError> {
        if segment.is_empty() || segment.contains('/') {
            return Err(StoreError::InvalidPath(format!("{}/{}", self.0, segment)));
        }
        if self.0.is_empty() {
            Ok(Path(segment.to_string()))
        } else {
            Ok(Path(format!("{}/{}", self.0, segment)))
        }
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The final segment, or `None` for the root.
    pub fn last_segment(&self) -> Option<&str> {
        self.segments().last()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// True when one path is an ancestor of (or equal to) the other.
    ///
    /// A write anywhere on the spine through a watched path can change the
    /// value materialized there, so overlapping paths are exactly the ones a
    /// commit needs to re-check.
    pub fn overlaps(&self, other: &Path) -> bool {
        fn is_prefix(shorter: &str, longer: &str) -> bool {
            shorter.is_empty()
                || (longer.starts_with(shorter)
                    && (longer.len() == shorter.len()
                        || longer.as_bytes()[shorter.len()] == b'/'))
        }
        is_prefix(&self.0, &other.0) || is_prefix(&other.0, &self.0)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for Path {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl TryFrom<String> for Path {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Path::parse(&value)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> String {
        path.0
    }
}

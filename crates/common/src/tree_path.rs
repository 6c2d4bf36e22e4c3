//! Portable tree paths
//!
//! Every location in a synchronized tree is addressed by a `TreePath`: a
//! slash-separated relative path, normalized on construction so that two
//! spellings of the same location compare equal regardless of host path
//! syntax.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TreePathError {
    #[error("path escapes the tree root: {0}")]
    Escapes(String),
    #[error("path is not relative: {0}")]
    NotRelative(String),
    #[error("path is not valid unicode: {0}")]
    NotUnicode(String),
}

/// A normalized relative path within a synchronized tree.
///
/// Invariants: segments are non-empty, contain no separator, and are never
/// `.` or `..`. The empty path denotes the tree root and is only meaningful
/// for directory queries, never as a tracked file.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreePath {
    segments: Vec<String>,
}

impl TreePath {
    /// The tree root (empty path)
    #[must_use]
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Build from an absolute host path known to live under `root`
    pub fn from_host(root: &Path, abs: &Path) -> Result<Self, TreePathError> {
        let rel = abs
            .strip_prefix(root)
            .map_err(|_| TreePathError::Escapes(abs.display().to_string()))?;
        Self::from_rel(rel)
    }

    /// Build from a host-relative path
    pub fn from_rel(rel: &Path) -> Result<Self, TreePathError> {
        let mut segments = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(seg) => {
                    let seg = seg
                        .to_str()
                        .ok_or_else(|| TreePathError::NotUnicode(rel.display().to_string()))?;
                    segments.push(seg.to_string());
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if segments.pop().is_none() {
                        return Err(TreePathError::Escapes(rel.display().to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(TreePathError::NotRelative(rel.display().to_string()));
                }
            }
        }
        Ok(Self { segments })
    }

    /// Convert to a host path under `root`
    #[must_use]
    pub fn to_native(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for seg in &self.segments {
            path.push(seg);
        }
        path
    }

    /// True for the tree root
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The final segment, if any
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The containing directory (root for single-segment paths, None for root)
    #[must_use]
    pub fn parent(&self) -> Option<TreePath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append a single segment
    #[must_use]
    pub fn join(&self, segment: &str) -> TreePath {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    /// True if `self` is a strict prefix of `other`
    #[must_use]
    pub fn is_ancestor_of(&self, other: &TreePath) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }
}

impl FromStr for TreePath {
    type Err = TreePathError;

    /// Parse the portable form, folding host separators to `/`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded = s.replace('\\', "/");
        if folded.starts_with('/') {
            return Err(TreePathError::NotRelative(s.to_string()));
        }
        let mut segments = Vec::new();
        for seg in folded.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(TreePathError::Escapes(s.to_string()));
                    }
                }
                seg => segments.push(seg.to_string()),
            }
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl fmt::Debug for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreePath({})", self)
    }
}

impl Serialize for TreePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TreePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

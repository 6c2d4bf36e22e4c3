//! Append-only change log for a synchronized tree
//!
//! The log is the authoritative record of which files exist in a tree. It is
//! persisted as two files at the tree root: the log file (one JSON entry per
//! line, append-only, never rewritten) and a meta record (a single JSON
//! object describing the revision, size and digest of the entire log file).
//! The pair is written log-first, meta-last, so a reader never observes a log
//! newer than the meta that describes it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::digest::Digest;
use crate::tree_path::TreePath;

/// Reserved filename for the on-disk entry log.
pub const LOG_FILE: &str = ".treesync.log";
/// Reserved filename for the on-disk meta record.
pub const META_FILE: &str = ".treesync.meta";

/// True for the two reserved filenames, which are excluded from scans,
/// watch processing and existence queries over the tree content.
#[must_use]
pub fn is_reserved(path: &TreePath) -> bool {
    path.segments().len() == 1 && matches!(path.file_name(), Some(LOG_FILE) | Some(META_FILE))
}

/// One record in the change log.
///
/// Entries are strictly ordered as produced; replaying them in order from
/// empty state deterministically reconstructs the reconciled mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Entry {
    Add {
        path: TreePath,
        digest: Digest,
        size: u64,
    },
    Remove {
        path: TreePath,
    },
}

/// The meta record describing the entire current log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub revision: u64,
    pub log_size: u64,
    pub log_digest: Digest,
}

#[derive(Debug, thiserror::Error)]
pub enum ChangeLogError {
    #[error(
        "log integrity mismatch: meta records {expected_size} bytes / {expected_digest}, \
         log file has {actual_size} bytes / {actual_digest}"
    )]
    Integrity {
        expected_size: u64,
        actual_size: u64,
        expected_digest: Digest,
        actual_digest: Digest,
    },

    #[error("log/meta pair incomplete: {0} is missing")]
    MissingPair(&'static str),

    #[error("in-memory entries diverged from the last persisted log")]
    Inconsistent,

    #[error("malformed log entry at line {line}: {source}")]
    MalformedEntry {
        line: usize,
        source: serde_json::Error,
    },

    #[error("malformed meta record: {0}")]
    MalformedMeta(serde_json::Error),

    #[error("log file is not valid utf-8")]
    NotUtf8,

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// In-memory reconciled view of a tree's change log.
///
/// Owns the ordered entry sequence, the path → (digest, size) mapping derived
/// from it, and the on-disk log/meta pair under `dir`. All mutation and
/// persistence goes through `&mut self`, which is the single-writer
/// discipline the dump suffix computation depends on.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    dir: PathBuf,
    entries: Vec<Entry>,
    /// Snapshot of `entries` as of the last successful dump or load.
    dumped: Vec<Entry>,
    state: BTreeMap<TreePath, (Digest, u64)>,
    revision: u64,
    log_digest: Option<Digest>,
}

impl ChangeLog {
    /// Create an empty change log rooted at `dir`. Nothing is read or
    /// written until `load`, `create` or `dump` is called.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: Vec::new(),
            dumped: Vec::new(),
            state: BTreeMap::new(),
            revision: 0,
            log_digest: None,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    #[must_use]
    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    /// Revision of the last persisted meta record (0 before first dump).
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Digest of the on-disk log as of the last load or dump.
    #[must_use]
    pub fn log_digest(&self) -> Option<Digest> {
        self.log_digest
    }

    /// Full ordered entry sequence, including not-yet-persisted entries.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Current (digest, size) pair for a path, if tracked.
    #[must_use]
    pub fn lookup(&self, path: &TreePath) -> Option<(Digest, u64)> {
        self.state.get(path).copied()
    }

    #[must_use]
    pub fn contains(&self, path: &TreePath) -> bool {
        self.state.contains_key(path)
    }

    /// Number of currently tracked files.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.state.len()
    }

    /// Iterate over currently tracked paths in sorted order.
    pub fn tracked(&self) -> impl Iterator<Item = &TreePath> {
        self.state.keys()
    }

    /// Iterate over the reconciled mapping in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&TreePath, &(Digest, u64))> {
        self.state.iter()
    }

    /// Record a file addition.
    ///
    /// Idempotent: when the path already maps to this exact (digest, size)
    /// pair, no entry is appended and no state changes. Returns whether an
    /// entry was appended.
    pub fn add(&mut self, path: TreePath, digest: Digest, size: u64) -> bool {
        if self.state.get(&path) == Some(&(digest, size)) {
            return false;
        }
        self.state.insert(path.clone(), (digest, size));
        self.entries.push(Entry::Add { path, digest, size });
        true
    }

    /// Record a file removal. No-op when the path is not tracked. Returns
    /// whether an entry was appended.
    pub fn remove(&mut self, path: &TreePath) -> bool {
        if self.state.remove(path).is_none() {
            return false;
        }
        self.entries.push(Entry::Remove { path: path.clone() });
        true
    }

    /// Persist the not-yet-written entry suffix and a fresh meta record.
    ///
    /// The suffix is found by positional comparison of the in-memory sequence
    /// against the sequence as of the last dump. Any divergence means history
    /// was rewritten underneath us and is fatal; it is never auto-repaired.
    /// Returns the revision, which never decreases across successive dumps.
    pub async fn dump(&mut self) -> Result<u64, ChangeLogError> {
        if self.entries.len() < self.dumped.len()
            || self.entries[..self.dumped.len()] != self.dumped[..]
        {
            return Err(ChangeLogError::Inconsistent);
        }
        let suffix = &self.entries[self.dumped.len()..];

        let meta_exists = tokio::fs::try_exists(self.meta_path()).await?;
        if suffix.is_empty() && meta_exists {
            return Ok(self.revision);
        }

        let mut buf = String::new();
        for entry in suffix {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .await?;
        file.write_all(buf.as_bytes()).await?;
        // log bytes must be durable before the meta record that describes them
        file.sync_all().await?;
        drop(file);

        let log_bytes = tokio::fs::read(self.log_path()).await?;
        let log_digest = Digest::of_bytes(&log_bytes);
        let meta = Meta {
            revision: self.revision + 1,
            log_size: log_bytes.len() as u64,
            log_digest,
        };

        let tmp = self.dir.join(format!("{META_FILE}.tmp"));
        tokio::fs::write(&tmp, serde_json::to_string(&meta)?).await?;
        tokio::fs::rename(&tmp, self.meta_path()).await?;

        self.revision = meta.revision;
        self.log_digest = Some(log_digest);
        self.dumped = self.entries.clone();
        debug!(
            revision = self.revision,
            appended = suffix.len(),
            "change log dumped"
        );
        Ok(self.revision)
    }

    /// Read and replay the on-disk pair, replacing the in-memory state.
    ///
    /// The meta record is verified against the actual log bytes first; any
    /// difference (truncation, corruption, a foreign writer) fails with an
    /// integrity error. A tree with neither file is a valid first use and
    /// loads empty; a tree with exactly one of the pair is an error.
    pub async fn load(&mut self) -> Result<(), ChangeLogError> {
        let log_exists = tokio::fs::try_exists(self.log_path()).await?;
        let meta_exists = tokio::fs::try_exists(self.meta_path()).await?;

        let (meta, log_bytes) = match (log_exists, meta_exists) {
            (false, false) => {
                self.entries.clear();
                self.dumped.clear();
                self.state.clear();
                self.revision = 0;
                self.log_digest = None;
                return Ok(());
            }
            (true, true) => {
                let meta_bytes = tokio::fs::read(self.meta_path()).await?;
                let meta: Meta =
                    serde_json::from_slice(&meta_bytes).map_err(ChangeLogError::MalformedMeta)?;
                (meta, tokio::fs::read(self.log_path()).await?)
            }
            (true, false) => return Err(ChangeLogError::MissingPair(META_FILE)),
            (false, true) => return Err(ChangeLogError::MissingPair(LOG_FILE)),
        };

        let actual_digest = Digest::of_bytes(&log_bytes);
        if log_bytes.len() as u64 != meta.log_size || actual_digest != meta.log_digest {
            return Err(ChangeLogError::Integrity {
                expected_size: meta.log_size,
                actual_size: log_bytes.len() as u64,
                expected_digest: meta.log_digest,
                actual_digest,
            });
        }

        let text = std::str::from_utf8(&log_bytes).map_err(|_| ChangeLogError::NotUtf8)?;
        let mut entries = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: Entry = serde_json::from_str(line)
                .map_err(|source| ChangeLogError::MalformedEntry {
                    line: idx + 1,
                    source,
                })?;
            entries.push(entry);
        }

        let mut state = BTreeMap::new();
        for entry in &entries {
            apply(&mut state, entry);
        }

        self.dumped = entries.clone();
        self.entries = entries;
        self.state = state;
        self.revision = meta.revision;
        self.log_digest = Some(actual_digest);
        debug!(
            revision = self.revision,
            entries = self.entries.len(),
            tracked = self.state.len(),
            "change log loaded"
        );
        Ok(())
    }

    /// Load-then-dump: establishes the on-disk pair if absent, otherwise
    /// adopts the existing state. Returns the current revision.
    pub async fn create(&mut self) -> Result<u64, ChangeLogError> {
        self.load().await?;
        self.dump().await
    }

    #[cfg(test)]
    fn rewrite_history(&mut self) {
        self.entries.pop();
    }
}

/// Fold one entry into a reconciled state map. A `Remove` always deletes any
/// prior mapping; an `Add` replaces it.
fn apply(state: &mut BTreeMap<TreePath, (Digest, u64)>, entry: &Entry) {
    match entry {
        Entry::Add { path, digest, size } => {
            state.insert(path.clone(), (*digest, *size));
        }
        Entry::Remove { path } => {
            state.remove(path);
        }
    }
}

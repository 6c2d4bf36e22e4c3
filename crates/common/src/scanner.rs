//! Full tree reconciliation
//!
//! Compares the change log against the live filesystem tree and emits the
//! minimal set of add/remove operations: used for first-time population of
//! an empty tree and for periodic healing of drift that incremental watching
//! may have missed.

use std::collections::BTreeSet;
use std::path::PathBuf;

use tokio::task::spawn_blocking;
use tracing::info;
use walkdir::WalkDir;

use crate::changelog::{self, ChangeLog, ChangeLogError};
use crate::digest::Digest;
use crate::tree_path::{TreePath, TreePathError};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("tree walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Path(#[from] TreePathError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Log(#[from] ChangeLogError),
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub added: usize,
    pub removed: usize,
    pub revision: u64,
}

/// Reconciles a change log with the live tree under a root directory.
#[derive(Debug, Clone)]
pub struct TreeScanner {
    root: PathBuf,
}

impl TreeScanner {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// One full reconciliation pass: removals for tracked paths no longer on
    /// disk, then additions for live files not yet tracked (digest and size
    /// read from disk), then a dump. Paths already tracked are left alone;
    /// the set difference is over normalized paths only.
    pub async fn reconcile(&self, log: &mut ChangeLog) -> Result<ScanSummary, ScanError> {
        let live = self.collect_live().await?;
        let live_set: BTreeSet<TreePath> = live.iter().cloned().collect();

        let deletes: Vec<TreePath> = log
            .tracked()
            .filter(|path| !live_set.contains(*path))
            .cloned()
            .collect();
        let mut removed = 0;
        for path in &deletes {
            if log.remove(path) {
                removed += 1;
            }
        }

        let mut added = 0;
        for path in &live {
            if log.contains(path) {
                continue;
            }
            let native = path.to_native(&self.root);
            let digest = Digest::of_file(&native).await?;
            let size = tokio::fs::metadata(&native).await?.len();
            if log.add(path.clone(), digest, size) {
                added += 1;
            }
        }

        let revision = log.dump().await?;
        info!(added, removed, revision, "tree reconciled");
        Ok(ScanSummary {
            added,
            removed,
            revision,
        })
    }

    /// Live regular files under the root in sorted discovery order, the
    /// reserved log/meta pair excluded.
    async fn collect_live(&self) -> Result<Vec<TreePath>, ScanError> {
        let root = self.root.clone();
        spawn_blocking(move || {
            let mut live = Vec::new();
            for entry in WalkDir::new(&root).sort_by_file_name() {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = TreePath::from_host(&root, entry.path())?;
                if changelog::is_reserved(&path) {
                    continue;
                }
                live.push(path);
            }
            Ok(live)
        })
        .await
        .expect("scan task panicked")
    }
}

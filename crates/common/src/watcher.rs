//! Watcher bridge
//!
//! Consumes live filesystem change notifications and incrementally updates a
//! change log, persisting after each batch. Raw `notify` events are first
//! normalized into the closed [`WatchEvent`] set; the bridge itself is
//! driven by those and is testable without a real watcher.
//!
//! Event processing is strictly sequential and ordered per tree: applying a
//! remove before its matching add would corrupt state.

use std::path::{Path, PathBuf};

use notify::event::{CreateKind, EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, trace, warn};

use crate::changelog::{self, ChangeLog, ChangeLogError};
use crate::digest::Digest;
use crate::tree_path::TreePath;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("watcher setup failed: {0}")]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Log(#[from] ChangeLogError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A normalized filesystem change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(TreePath),
    Deleted(TreePath),
    Changed(TreePath),
    MovedTo { from: TreePath, to: TreePath },
    CopiedFrom { source: TreePath, dest: TreePath },
}

/// Applies watch events to a change log and persists after each batch.
#[derive(Debug)]
pub struct WatcherBridge {
    root: PathBuf,
    log: ChangeLog,
}

impl WatcherBridge {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, log: ChangeLog) -> Self {
        Self {
            root: root.into(),
            log,
        }
    }

    #[must_use]
    pub fn log(&self) -> &ChangeLog {
        &self.log
    }

    /// Mutable access for interleaved full reconciliation passes.
    #[must_use]
    pub fn log_mut(&mut self) -> &mut ChangeLog {
        &mut self.log
    }

    #[must_use]
    pub fn into_log(self) -> ChangeLog {
        self.log
    }

    /// Apply one event to the in-memory log (no dump). Returns whether the
    /// log changed. Reserved filenames are always ignored; directories are
    /// detected and skipped; only regular files are tracked.
    pub async fn apply(&mut self, event: WatchEvent) -> Result<bool, WatchError> {
        match event {
            WatchEvent::Created(path) => self.add_from_disk(path).await,
            WatchEvent::Deleted(path) => {
                if changelog::is_reserved(&path) {
                    return Ok(false);
                }
                Ok(self.log.remove(&path))
            }
            // content changes are re-added with a freshly computed digest;
            // an unchanged (digest, size) pair appends nothing
            WatchEvent::Changed(path) => self.add_from_disk(path).await,
            WatchEvent::MovedTo { from, to } => {
                let added = self.add_from_disk(to).await?;
                let removed = if changelog::is_reserved(&from) {
                    false
                } else {
                    self.log.remove(&from)
                };
                Ok(added || removed)
            }
            WatchEvent::CopiedFrom { source, dest } => {
                trace!(source = %source, dest = %dest, "copy event");
                self.add_from_disk(dest).await
            }
        }
    }

    /// Apply a batch in order, then dump. Returns the revision.
    pub async fn apply_batch(&mut self, events: Vec<WatchEvent>) -> Result<u64, WatchError> {
        for event in events {
            self.apply(event).await?;
        }
        Ok(self.log.dump().await?)
    }

    /// Drain events from a channel until it closes, dumping after each
    /// batch of pending events. Returns the final log.
    pub async fn run(mut self, events: flume::Receiver<WatchEvent>) -> Result<ChangeLog, WatchError> {
        while let Ok(first) = events.recv_async().await {
            let mut batch = vec![first];
            while let Ok(next) = events.try_recv() {
                batch.push(next);
            }
            let count = batch.len();
            let revision = self.apply_batch(batch).await?;
            debug!(count, revision, "watch batch applied");
        }
        Ok(self.into_log())
    }

    async fn add_from_disk(&mut self, path: TreePath) -> Result<bool, WatchError> {
        if changelog::is_reserved(&path) {
            return Ok(false);
        }
        let native = path.to_native(&self.root);
        let meta = match tokio::fs::metadata(&native).await {
            Ok(meta) => meta,
            // the file can be gone again by the time the event arrives
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                trace!(path = %path, "notified file vanished before processing");
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };
        if meta.is_dir() {
            return Ok(false);
        }
        let digest = Digest::of_file(&native).await?;
        Ok(self.log.add(path, digest, meta.len()))
    }
}

/// Start a recursive `notify` watcher on `root`, translating raw events into
/// normalized [`WatchEvent`]s on the returned channel. The watcher stops
/// (and the channel closes) when the returned handle is dropped.
pub fn spawn_watcher(
    root: &Path,
) -> Result<(RecommendedWatcher, flume::Receiver<WatchEvent>), WatchError> {
    let (tx, rx) = flume::unbounded();
    let root_buf = root.to_path_buf();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        match result {
            Ok(event) => {
                for normalized in translate(&root_buf, &event) {
                    if tx.send(normalized).is_err() {
                        return;
                    }
                }
            }
            Err(err) => warn!(error = %err, "watch notification error"),
        }
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;

    Ok((watcher, rx))
}

/// Normalize one raw notify event. Paths outside the root and the reserved
/// log/meta pair are dropped here.
fn translate(root: &Path, event: &notify::Event) -> Vec<WatchEvent> {
    let paths: Vec<TreePath> = event
        .paths
        .iter()
        .filter_map(|p| TreePath::from_host(root, p).ok())
        .filter(|p| !changelog::is_reserved(p))
        .collect();
    if paths.is_empty() {
        return Vec::new();
    }

    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => paths.into_iter().map(WatchEvent::Created).collect(),
        EventKind::Remove(_) => paths.into_iter().map(WatchEvent::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            let mut iter = paths.into_iter();
            let from = iter.next().expect("checked length");
            let to = iter.next().expect("checked length");
            vec![WatchEvent::MovedTo { from, to }]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.into_iter().map(WatchEvent::Deleted).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.into_iter().map(WatchEvent::Created).collect()
        }
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            paths.into_iter().map(WatchEvent::Changed).collect()
        }
        _ => Vec::new(),
    }
}

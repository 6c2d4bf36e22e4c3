//! Remote-backed read-only cache
//!
//! A read-only virtual filesystem overlaying a local cache directory,
//! addressed against a remote origin. Existence and listing queries are
//! answered purely from the replica change log, with no network access; file
//! bytes are fetched lazily with resumable transfer and are verified against
//! the recorded digest before they are ever served.
//!
//! The replica log is swapped wholesale on `update` (readers in flight keep
//! the snapshot they started with), and `repair` deletes any cached file the
//! current log does not vouch for.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::changelog::{self, ChangeLog, ChangeLogError, Meta, LOG_FILE, META_FILE};
use crate::digest::Digest;
use crate::store::{FileStat, LocalStore};
use crate::transport::{Transport, TransportError};
use crate::tree_path::TreePath;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(
        "integrity mismatch for {path}: expected {expected_size} bytes / {expected_digest}, \
         fetched {actual_size} bytes / {actual_digest}"
    )]
    Integrity {
        path: TreePath,
        expected_digest: Digest,
        expected_size: u64,
        actual_digest: Digest,
        actual_size: u64,
    },

    #[error("not found upstream: {0}")]
    NotFoundUpstream(String),

    #[error("not tracked: {0}")]
    Untracked(TreePath),

    #[error("update rejected: {0}")]
    UpdateRejected(String),

    #[error(transparent)]
    Transport(TransportError),

    #[error("local storage failure: {0}")]
    Storage(#[from] std::io::Error),

    #[error(transparent)]
    Log(#[from] ChangeLogError),
}

/// One name in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// What a repair pass deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairStats {
    pub online_only: usize,
    pub untracked: usize,
    pub corrupt: usize,
    pub pruned_dirs: usize,
}

/// Result of an `update` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The origin's meta record matches the current local state.
    Unchanged,
    Updated { revision: u64, repair: RepairStats },
}

/// A read-only, lazily populated mirror of a remote tree.
pub struct RemoteCache<T> {
    store: LocalStore,
    transport: T,
    /// Replica change log, replaced wholesale on `update`.
    log: RwLock<Arc<ChangeLog>>,
    /// Paths whose cached bytes have passed a digest check against the
    /// current log snapshot. Cleared on every snapshot swap.
    verified: Mutex<HashSet<TreePath>>,
    /// Paths that must never persist in the local cache.
    online_only: Mutex<HashSet<TreePath>>,
    fetch_locks: Mutex<HashMap<TreePath, Arc<tokio::sync::Mutex<()>>>>,
}

impl<T: Transport> RemoteCache<T> {
    /// Open a cache over a local directory and an origin transport.
    ///
    /// An existing replica log pair is adopted. A pair that fails
    /// verification is not adopted and not served from: the cache starts
    /// empty (so nothing stale is visible) until the next `update`
    /// re-establishes it.
    pub async fn open(store: LocalStore, transport: T) -> Result<Self, CacheError> {
        let mut log = ChangeLog::new(store.root());
        if let Err(err) = log.load().await {
            match err {
                ChangeLogError::Io(err) => return Err(CacheError::Storage(err)),
                err => {
                    warn!(error = %err, "replica log unusable, starting empty until next update");
                    log = ChangeLog::new(store.root());
                }
            }
        }
        Ok(Self {
            store,
            transport,
            log: RwLock::new(Arc::new(log)),
            verified: Mutex::new(HashSet::new()),
            online_only: Mutex::new(HashSet::new()),
            fetch_locks: Mutex::new(HashMap::new()),
        })
    }

    /// The current log snapshot. Holders keep a consistent view across a
    /// concurrent `update`.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ChangeLog> {
        self.log.read().clone()
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.log.read().revision()
    }

    #[must_use]
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mark a path as online-only: it is never kept in the local cache and
    /// every `repair` pass deletes it. Read semantics are unaffected.
    pub fn mark_online(&self, path: TreePath) {
        self.online_only.lock().insert(path);
    }

    /// True when the path is a tracked file or a directory prefix of one.
    /// No network access.
    #[must_use]
    pub fn file_exists(&self, path: &TreePath) -> bool {
        if changelog::is_reserved(path) {
            return false;
        }
        let log = self.snapshot();
        log.contains(path) || self.is_directory_in(&log, path)
    }

    /// True when the path is a directory prefix of some tracked path.
    /// No network access.
    #[must_use]
    pub fn is_directory(&self, path: &TreePath) -> bool {
        self.is_directory_in(&self.snapshot(), path)
    }

    fn is_directory_in(&self, log: &ChangeLog, path: &TreePath) -> bool {
        if path.is_root() {
            return true;
        }
        log.tracked().any(|tracked| path.is_ancestor_of(tracked))
    }

    /// List a directory from the reconciled state: tracked files whose
    /// parent is `path`, plus the distinct immediate subdirectory names.
    /// No network access.
    #[must_use]
    pub fn read_directory(&self, path: &TreePath) -> Vec<DirEntry> {
        let log = self.snapshot();
        let depth = path.segments().len();
        let mut names: BTreeMap<String, bool> = BTreeMap::new();
        for tracked in log.tracked() {
            if !path.is_root() && !path.is_ancestor_of(tracked) {
                continue;
            }
            let name = tracked.segments()[depth].clone();
            let is_dir = tracked.segments().len() > depth + 1;
            *names.entry(name).or_insert(false) |= is_dir;
        }
        names
            .into_iter()
            .map(|(name, is_dir)| DirEntry { name, is_dir })
            .collect()
    }

    /// Stat a path, lazily fetching file content first. Directories are
    /// answered from the state alone.
    pub async fn stat(&self, path: &TreePath) -> Result<FileStat, CacheError> {
        let log = self.snapshot();
        if self.is_directory_in(&log, path) {
            return Ok(FileStat {
                size: 0,
                is_dir: true,
            });
        }
        self.get(path, true).await?;
        Ok(self.store.stat(path).await?)
    }

    /// Open a file for reading, lazily fetching and verifying it first.
    pub async fn open_for_read(&self, path: &TreePath) -> Result<tokio::fs::File, CacheError> {
        self.get(path, true).await?;
        Ok(self.store.open(path).await?)
    }

    /// Read a whole file, lazily fetching and verifying it first.
    pub async fn read(&self, path: &TreePath) -> Result<Vec<u8>, CacheError> {
        self.get(path, true).await?;
        Ok(self.store.read(path).await?)
    }

    /// Ensure the file is locally present and matches its recorded
    /// (digest, size).
    ///
    /// With `trust_digest_hint`, a path that already passed verification
    /// against the current snapshot is accepted without recomputation.
    /// Otherwise the local digest is recomputed; only on a mismatch or a
    /// missing file does this download (resuming from the current local
    /// byte offset), re-verify, and retry once from scratch before
    /// surfacing an integrity error.
    pub async fn get(&self, path: &TreePath, trust_digest_hint: bool) -> Result<(), CacheError> {
        let log = self.snapshot();
        let Some((digest, size)) = log.lookup(path) else {
            return Err(CacheError::Untracked(path.clone()));
        };

        // concurrent fetches of one path are serialized; distinct paths
        // proceed in parallel
        let lock = self.fetch_lock(path);
        let _guard = lock.lock().await;

        if trust_digest_hint
            && self.verified.lock().contains(path)
            && self.store.exists(path).await
        {
            return Ok(());
        }

        if self.store.exists(path).await {
            let stat = self.store.stat(path).await?;
            if !stat.is_dir
                && stat.size == size
                && self.store.digest_of(path).await? == digest
            {
                self.verified.lock().insert(path.clone());
                return Ok(());
            }
        }

        self.store.mkdir_parents(path).await?;

        // first attempt resumes any partial bytes already on disk
        if self.fetch_once(path, digest, size, true).await?.is_none() {
            return Ok(());
        }
        warn!(path = %path, "fetched content failed verification, refetching from scratch");
        if self.store.exists(path).await {
            self.store.remove_file(path).await?;
        }
        match self.fetch_once(path, digest, size, false).await? {
            None => Ok(()),
            Some((actual_digest, actual_size)) => Err(CacheError::Integrity {
                path: path.clone(),
                expected_digest: digest,
                expected_size: size,
                actual_digest,
                actual_size,
            }),
        }
    }

    /// One download plus full-file verification. `Ok(None)` means verified;
    /// `Ok(Some(actuals))` reports a mismatch for the caller to act on.
    async fn fetch_once(
        &self,
        path: &TreePath,
        digest: Digest,
        size: u64,
        resume: bool,
    ) -> Result<Option<(Digest, u64)>, CacheError> {
        let offset = if resume && self.store.exists(path).await {
            self.store.stat(path).await?.size
        } else {
            0
        };

        let rel = path.to_string();
        let native = self.store.native(path);
        let outcome = match self.transport.fetch(&rel, &native, offset).await {
            Ok(outcome) => outcome,
            Err(TransportError::NotFound(_)) => {
                return Err(CacheError::NotFoundUpstream(rel));
            }
            Err(err) => return Err(CacheError::Transport(err)),
        };
        debug!(
            path = %path,
            resumed_from = outcome.resumed_from,
            bytes = outcome.bytes_fetched,
            "cache fill"
        );

        let actual_size = self.store.stat(path).await?.size;
        let actual_digest = self.store.digest_of(path).await?;
        if actual_size == size && actual_digest == digest {
            self.verified.lock().insert(path.clone());
            Ok(None)
        } else {
            Ok(Some((actual_digest, actual_size)))
        }
    }

    fn fetch_lock(&self, path: &TreePath) -> Arc<tokio::sync::Mutex<()>> {
        self.fetch_locks
            .lock()
            .entry(path.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Delete every locally cached file the current log does not vouch for:
    /// online-only files, files absent from the reconciled state, and files
    /// whose bytes no longer match the recorded (digest, size). Empty
    /// directories are then pruned bottom-up until a pass removes nothing.
    pub async fn repair(&self) -> Result<RepairStats, CacheError> {
        let log = self.snapshot();
        let online = self.online_only.lock().clone();
        let mut stats = RepairStats::default();

        for path in self.store.walk_files().await? {
            if changelog::is_reserved(&path) {
                continue;
            }
            if online.contains(&path) {
                self.evict(&path).await?;
                stats.online_only += 1;
                continue;
            }
            let Some((digest, size)) = log.lookup(&path) else {
                self.evict(&path).await?;
                stats.untracked += 1;
                continue;
            };
            let stat = self.store.stat(&path).await?;
            if stat.size != size || self.store.digest_of(&path).await? != digest {
                self.evict(&path).await?;
                stats.corrupt += 1;
            }
        }

        stats.pruned_dirs = self.store.prune_empty_dirs().await?;
        info!(
            online_only = stats.online_only,
            untracked = stats.untracked,
            corrupt = stats.corrupt,
            pruned_dirs = stats.pruned_dirs,
            "cache repaired"
        );
        Ok(stats)
    }

    async fn evict(&self, path: &TreePath) -> Result<(), CacheError> {
        self.store.remove_file(path).await?;
        self.verified.lock().remove(path);
        Ok(())
    }

    /// Pull a fresh log/meta pair from the origin, verify it, swap it in
    /// and repair the cache to match.
    ///
    /// The pair is downloaded into a scoped temporary directory (removed on
    /// every exit path) and cross-checked: the downloaded log must match the
    /// downloaded meta exactly. Only then is it renamed over the committed
    /// pair, log first, meta last. A failure at any step leaves the
    /// previously committed pair byte-for-byte untouched.
    pub async fn update(&self) -> Result<UpdateOutcome, CacheError> {
        let staging = tempfile::tempdir_in(self.store.root())?;
        let staged_meta = staging.path().join(META_FILE);
        let staged_log = staging.path().join(LOG_FILE);

        for (name, dest) in [(META_FILE, &staged_meta), (LOG_FILE, &staged_log)] {
            match self.transport.fetch(name, dest, 0).await {
                Ok(_) => {}
                Err(TransportError::NotFound(_)) => {
                    return Err(CacheError::NotFoundUpstream(name.to_string()));
                }
                Err(err) => return Err(CacheError::Transport(err)),
            }
        }

        let meta_bytes = tokio::fs::read(&staged_meta).await?;
        let meta: Meta = serde_json::from_slice(&meta_bytes)
            .map_err(|err| CacheError::UpdateRejected(format!("malformed meta record: {err}")))?;

        let log_bytes = tokio::fs::read(&staged_log).await?;
        let actual_size = log_bytes.len() as u64;
        let actual_digest = Digest::of_bytes(&log_bytes);
        if actual_size != meta.log_size || actual_digest != meta.log_digest {
            return Err(CacheError::UpdateRejected(format!(
                "downloaded log does not match its meta record: \
                 size {actual_size} vs {expected_size}, digest {actual_digest} vs {expected_digest}",
                expected_size = meta.log_size,
                expected_digest = meta.log_digest,
            )));
        }

        {
            let current = self.snapshot();
            if meta.revision == current.revision() && current.log_digest() == Some(meta.log_digest)
            {
                debug!(revision = meta.revision, "origin unchanged");
                return Ok(UpdateOutcome::Unchanged);
            }
        }

        tokio::fs::rename(&staged_log, self.store.root().join(LOG_FILE)).await?;
        tokio::fs::rename(&staged_meta, self.store.root().join(META_FILE)).await?;
        drop(staging);

        let mut fresh = ChangeLog::new(self.store.root());
        fresh.load().await?;
        let revision = fresh.revision();
        *self.log.write() = Arc::new(fresh);
        self.verified.lock().clear();

        let repair = self.repair().await?;
        info!(revision, "cache updated");
        Ok(UpdateOutcome::Updated { revision, repair })
    }
}

impl<T> std::fmt::Debug for RemoteCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCache")
            .field("root", &self.store.root())
            .field("revision", &self.log.read().revision())
            .field("verified", &self.verified.lock().len())
            .field("online_only", &self.online_only.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FsTransport;

    fn path(s: &str) -> TreePath {
        s.parse().unwrap()
    }

    /// Origin directory with a populated change log pair.
    async fn seed_origin(files: &[(&str, &[u8])]) -> tempfile::TempDir {
        let origin = tempfile::tempdir().unwrap();
        let mut log = ChangeLog::new(origin.path());
        for (name, content) in files {
            let p = path(name);
            let native = p.to_native(origin.path());
            if let Some(parent) = native.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&native, content).unwrap();
            log.add(p, Digest::of_bytes(content), content.len() as u64);
        }
        log.dump().await.unwrap();
        origin
    }

    async fn open_cache(
        origin: &tempfile::TempDir,
        local: &tempfile::TempDir,
    ) -> RemoteCache<FsTransport> {
        let cache = RemoteCache::open(
            LocalStore::new(local.path()),
            FsTransport::new(origin.path()),
        )
        .await
        .unwrap();
        cache.update().await.unwrap();
        cache
    }

    #[tokio::test]
    async fn test_existence_and_listing_need_no_fetch() {
        let origin = seed_origin(&[("a.txt", b"alpha"), ("b/c.txt", b"gamma")]).await;
        let local = tempfile::tempdir().unwrap();
        let cache = open_cache(&origin, &local).await;

        assert!(cache.file_exists(&path("a.txt")));
        assert!(cache.file_exists(&path("b")));
        assert!(cache.is_directory(&path("b")));
        assert!(!cache.file_exists(&path("missing.txt")));
        assert!(!cache.file_exists(&path(LOG_FILE)));

        let root_listing = cache.read_directory(&TreePath::root());
        assert_eq!(
            root_listing,
            vec![
                DirEntry {
                    name: "a.txt".to_string(),
                    is_dir: false
                },
                DirEntry {
                    name: "b".to_string(),
                    is_dir: true
                },
            ]
        );
        assert_eq!(
            cache.read_directory(&path("b")),
            vec![DirEntry {
                name: "c.txt".to_string(),
                is_dir: false
            }]
        );

        // nothing was fetched for any of the above
        assert!(!local.path().join("a.txt").exists());
        assert!(!local.path().join("b").exists());
    }

    #[tokio::test]
    async fn test_get_fetches_and_verifies() {
        let origin = seed_origin(&[("b/c.txt", b"gamma")]).await;
        let local = tempfile::tempdir().unwrap();
        let cache = open_cache(&origin, &local).await;

        cache.get(&path("b/c.txt"), false).await.unwrap();
        assert_eq!(
            tokio::fs::read(local.path().join("b/c.txt")).await.unwrap(),
            b"gamma"
        );

        let data = cache.read(&path("b/c.txt")).await.unwrap();
        assert_eq!(data, b"gamma");
    }

    #[tokio::test]
    async fn test_get_untracked_path() {
        let origin = seed_origin(&[("a.txt", b"alpha")]).await;
        let local = tempfile::tempdir().unwrap();
        let cache = open_cache(&origin, &local).await;

        let err = cache.get(&path("nope.txt"), false).await.unwrap_err();
        assert!(matches!(err, CacheError::Untracked(_)));
    }

    #[tokio::test]
    async fn test_missing_upstream_is_distinct() {
        let origin = seed_origin(&[("a.txt", b"alpha")]).await;
        let local = tempfile::tempdir().unwrap();
        let cache = open_cache(&origin, &local).await;

        // tracked in the log but deleted at the origin behind our back
        std::fs::remove_file(origin.path().join("a.txt")).unwrap();
        let err = cache.get(&path("a.txt"), false).await.unwrap_err();
        assert!(matches!(err, CacheError::NotFoundUpstream(_)));
    }

    #[tokio::test]
    async fn test_stat_of_directory_and_file() {
        let origin = seed_origin(&[("b/c.txt", b"gamma")]).await;
        let local = tempfile::tempdir().unwrap();
        let cache = open_cache(&origin, &local).await;

        let dir_stat = cache.stat(&path("b")).await.unwrap();
        assert!(dir_stat.is_dir);

        let file_stat = cache.stat(&path("b/c.txt")).await.unwrap();
        assert_eq!(file_stat.size, 5);
        assert!(!file_stat.is_dir);
    }

    #[tokio::test]
    async fn test_repair_removes_untracked_and_corrupt() {
        let origin = seed_origin(&[("keep.txt", b"keep me")]).await;
        let local = tempfile::tempdir().unwrap();
        let cache = open_cache(&origin, &local).await;

        cache.get(&path("keep.txt"), false).await.unwrap();

        // an extra file the log knows nothing about, and a corrupted byte
        std::fs::create_dir_all(local.path().join("stray")).unwrap();
        std::fs::write(local.path().join("stray/extra.txt"), b"extra").unwrap();
        std::fs::write(local.path().join("keep.txt"), b"keep mE").unwrap();

        let stats = cache.repair().await.unwrap();
        assert_eq!(stats.untracked, 1);
        assert_eq!(stats.corrupt, 1);
        assert_eq!(stats.pruned_dirs, 1);
        assert!(!local.path().join("stray").exists());
        assert!(!local.path().join("keep.txt").exists());

        // the corrupted file is eligible for re-fetch
        cache.get(&path("keep.txt"), false).await.unwrap();
        assert_eq!(
            tokio::fs::read(local.path().join("keep.txt")).await.unwrap(),
            b"keep me"
        );
    }

    #[tokio::test]
    async fn test_repair_removes_online_only() {
        let origin = seed_origin(&[("transient.txt", b"fleeting")]).await;
        let local = tempfile::tempdir().unwrap();
        let cache = open_cache(&origin, &local).await;

        cache.get(&path("transient.txt"), false).await.unwrap();
        cache.mark_online(path("transient.txt"));

        let stats = cache.repair().await.unwrap();
        assert_eq!(stats.online_only, 1);
        assert!(!local.path().join("transient.txt").exists());
    }

    #[tokio::test]
    async fn test_update_unchanged_short_circuits() {
        let origin = seed_origin(&[("a.txt", b"alpha")]).await;
        let local = tempfile::tempdir().unwrap();
        let cache = open_cache(&origin, &local).await;

        let outcome = cache.update().await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_update_picks_up_new_revision() {
        let origin = seed_origin(&[("a.txt", b"alpha")]).await;
        let local = tempfile::tempdir().unwrap();
        let cache = open_cache(&origin, &local).await;
        let before = cache.revision();

        let mut log = ChangeLog::new(origin.path());
        log.load().await.unwrap();
        std::fs::write(origin.path().join("b.txt"), b"beta").unwrap();
        log.add(path("b.txt"), Digest::of_bytes(b"beta"), 4);
        log.dump().await.unwrap();

        match cache.update().await.unwrap() {
            UpdateOutcome::Updated { revision, .. } => assert!(revision > before),
            other => panic!("expected update, got {other:?}"),
        }
        assert!(cache.file_exists(&path("b.txt")));
    }

    #[tokio::test]
    async fn test_update_drops_stale_cached_files() {
        let origin = seed_origin(&[("a.txt", b"alpha"), ("b.txt", b"beta")]).await;
        let local = tempfile::tempdir().unwrap();
        let cache = open_cache(&origin, &local).await;
        cache.get(&path("a.txt"), false).await.unwrap();
        cache.get(&path("b.txt"), false).await.unwrap();

        // origin forgets b.txt
        let mut log = ChangeLog::new(origin.path());
        log.load().await.unwrap();
        log.remove(&path("b.txt"));
        log.dump().await.unwrap();

        cache.update().await.unwrap();
        assert!(local.path().join("a.txt").exists());
        assert!(!local.path().join("b.txt").exists());
        assert!(!cache.file_exists(&path("b.txt")));
    }
}

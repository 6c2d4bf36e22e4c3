//! Rooted local storage collaborator
//!
//! A thin abstraction over a directory on the local filesystem, addressed by
//! portable tree paths. The remote cache composes over this rather than
//! touching the filesystem directly.

use std::path::{Path, PathBuf};

use tokio::task::spawn_blocking;
use walkdir::WalkDir;

use crate::digest::Digest;
use crate::tree_path::TreePath;

/// Size and kind of a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
}

/// A directory rooted on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for a tree path.
    #[must_use]
    pub fn native(&self, path: &TreePath) -> PathBuf {
        path.to_native(&self.root)
    }

    pub async fn exists(&self, path: &TreePath) -> bool {
        tokio::fs::try_exists(self.native(path)).await.unwrap_or(false)
    }

    pub async fn stat(&self, path: &TreePath) -> std::io::Result<FileStat> {
        let meta = tokio::fs::metadata(self.native(path)).await?;
        Ok(FileStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    pub async fn open(&self, path: &TreePath) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::open(self.native(path)).await
    }

    pub async fn read(&self, path: &TreePath) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(self.native(path)).await
    }

    /// Create the containing directories of a tree path.
    pub async fn mkdir_parents(&self, path: &TreePath) -> std::io::Result<()> {
        if let Some(parent) = self.native(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    pub async fn remove_file(&self, path: &TreePath) -> std::io::Result<()> {
        tokio::fs::remove_file(self.native(path)).await
    }

    pub async fn digest_of(&self, path: &TreePath) -> std::io::Result<Digest> {
        Digest::of_file(&self.native(path)).await
    }

    /// List the immediate children of a directory as (name, is_dir) pairs.
    pub async fn read_dir(&self, path: &TreePath) -> std::io::Result<Vec<(String, bool)>> {
        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(self.native(path)).await?;
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await?.is_dir();
            entries.push((name, is_dir));
        }
        entries.sort();
        Ok(entries)
    }

    /// All regular files under the root, sorted, as tree paths.
    pub async fn walk_files(&self) -> std::io::Result<Vec<TreePath>> {
        let root = self.root.clone();
        spawn_blocking(move || {
            let mut out = Vec::new();
            for entry in WalkDir::new(&root).sort_by_file_name() {
                let entry = entry.map_err(std::io::Error::other)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = TreePath::from_host(&root, entry.path())
                    .map_err(std::io::Error::other)?;
                out.push(path);
            }
            Ok(out)
        })
        .await
        .expect("walk task panicked")
    }

    /// Remove empty directories bottom-up, repeating until a pass removes
    /// nothing. Returns how many directories were removed in total.
    pub async fn prune_empty_dirs(&self) -> std::io::Result<usize> {
        let root = self.root.clone();
        spawn_blocking(move || {
            let mut total = 0;
            loop {
                let mut removed_this_pass = 0;
                for entry in WalkDir::new(&root).contents_first(true) {
                    let entry = entry.map_err(std::io::Error::other)?;
                    if !entry.file_type().is_dir() || entry.path() == root {
                        continue;
                    }
                    // remove_dir fails on non-empty directories, which is the check
                    if std::fs::remove_dir(entry.path()).is_ok() {
                        removed_this_pass += 1;
                    }
                }
                total += removed_this_pass;
                if removed_this_pass == 0 {
                    return Ok(total);
                }
            }
        })
        .await
        .expect("prune task panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> TreePath {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_exists_and_stat() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        tokio::fs::write(dir.path().join("a.txt"), b"hello")
            .await
            .unwrap();

        assert!(store.exists(&path("a.txt")).await);
        assert!(!store.exists(&path("missing.txt")).await);

        let stat = store.stat(&path("a.txt")).await.unwrap();
        assert_eq!(stat.size, 5);
        assert!(!stat.is_dir);
    }

    #[tokio::test]
    async fn test_mkdir_parents_and_walk() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        store.mkdir_parents(&path("b/c/d.txt")).await.unwrap();
        tokio::fs::write(dir.path().join("b/c/d.txt"), b"deep")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"top")
            .await
            .unwrap();

        let files = store.walk_files().await.unwrap();
        assert_eq!(files, vec![path("a.txt"), path("b/c/d.txt")]);
    }

    #[tokio::test]
    async fn test_prune_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        tokio::fs::create_dir_all(dir.path().join("x/y/z"))
            .await
            .unwrap();
        tokio::fs::create_dir_all(dir.path().join("keep"))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("keep/file.txt"), b"stay")
            .await
            .unwrap();

        let removed = store.prune_empty_dirs().await.unwrap();
        assert_eq!(removed, 3);
        assert!(!dir.path().join("x").exists());
        assert!(dir.path().join("keep/file.txt").exists());
    }

    #[tokio::test]
    async fn test_digest_of() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        tokio::fs::write(dir.path().join("a.txt"), b"hello")
            .await
            .unwrap();

        let digest = store.digest_of(&path("a.txt")).await.unwrap();
        assert_eq!(digest, Digest::of_bytes(b"hello"));
    }
}

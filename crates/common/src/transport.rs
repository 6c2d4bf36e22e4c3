//! Origin transports
//!
//! A transport fetches file bytes from the origin a cache synchronizes
//! against. The trait distinguishes "the origin does not have this file"
//! from every other failure, and supports resumption: a fetch with a nonzero
//! offset appends to an existing partial file instead of restarting. A
//! transport that cannot resume restarts from zero and reports so.

use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::debug;
use url::Url;

use crate::tree_path::TreePath;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not found at origin: {0}")]
    NotFound(String),

    #[error("origin returned status {status} for {path}")]
    Status { status: u16, path: String },

    #[error("invalid origin location: {0}")]
    InvalidLocation(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result of a single fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Byte offset the transfer actually resumed from (0 for a full fetch).
    pub resumed_from: u64,
    /// Bytes transferred in this call.
    pub bytes_fetched: u64,
}

/// Fetches origin files into local destination paths.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Download `rel` (portable slash-separated path) from the origin into
    /// `dest`. `offset > 0` asks to resume: bytes before the offset are kept
    /// and the transfer appends. Verification is the caller's job and is
    /// always full-file.
    async fn fetch(
        &self,
        rel: &str,
        dest: &Path,
        offset: u64,
    ) -> Result<FetchOutcome, TransportError>;
}

/// HTTP(S) origin, resuming with `Range` requests.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    /// Create a transport for an origin base URL. A missing trailing slash
    /// would make `Url::join` drop the last path segment, so one is added.
    #[must_use]
    pub fn new(mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Self {
            client: reqwest::Client::new(),
            base,
        }
    }

    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        rel: &str,
        dest: &Path,
        offset: u64,
    ) -> Result<FetchOutcome, TransportError> {
        let url = self
            .base
            .join(rel)
            .map_err(|_| TransportError::InvalidLocation(rel.to_string()))?;

        let mut request = self.client.get(url.clone());
        if offset > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={offset}-"));
        }
        let mut response = request.send().await?;

        // a partial file can already be full-length (with wrong bytes); the
        // origin answers the out-of-range resume with 416, so start over
        if offset > 0 && response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            response = self.client.get(url).send().await?;
        }

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(TransportError::NotFound(rel.to_string()));
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                path: rel.to_string(),
            });
        }

        // 206 honors the range; a 200 means the origin ignored it and is
        // sending the whole file again
        let resumed_from = if offset > 0 && status == StatusCode::PARTIAL_CONTENT {
            offset
        } else {
            0
        };

        let mut file = if resumed_from > 0 {
            tokio::fs::OpenOptions::new().append(true).open(dest).await?
        } else {
            tokio::fs::File::create(dest).await?
        };

        let mut bytes_fetched = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            bytes_fetched += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(path = rel, resumed_from, bytes = bytes_fetched, "fetched from origin");
        Ok(FetchOutcome {
            resumed_from,
            bytes_fetched,
        })
    }
}

/// Origin on a locally reachable directory (e.g. a mounted share).
#[derive(Debug, Clone)]
pub struct FsTransport {
    base: std::path::PathBuf,
}

impl FsTransport {
    #[must_use]
    pub fn new(base: impl Into<std::path::PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

#[async_trait]
impl Transport for FsTransport {
    async fn fetch(
        &self,
        rel: &str,
        dest: &Path,
        offset: u64,
    ) -> Result<FetchOutcome, TransportError> {
        let tree_path: TreePath = rel
            .parse()
            .map_err(|_| TransportError::InvalidLocation(rel.to_string()))?;
        let src = tree_path.to_native(&self.base);

        let mut source = match tokio::fs::File::open(&src).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransportError::NotFound(rel.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let len = source.metadata().await?.len();
        let resumed_from = if offset > 0 && offset <= len { offset } else { 0 };

        let mut file = if resumed_from > 0 {
            source.seek(std::io::SeekFrom::Start(resumed_from)).await?;
            tokio::fs::OpenOptions::new().append(true).open(dest).await?
        } else {
            tokio::fs::File::create(dest).await?
        };

        let bytes_fetched = tokio::io::copy(&mut source, &mut file).await?;
        file.flush().await?;

        debug!(path = rel, resumed_from, bytes = bytes_fetched, "fetched from origin dir");
        Ok(FetchOutcome {
            resumed_from,
            bytes_fetched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let transport = HttpTransport::new(Url::parse("http://origin.example/tree").unwrap());
        assert_eq!(transport.base().as_str(), "http://origin.example/tree/");
        // joins resolve inside the tree, not beside it
        let joined = transport.base().join("a/b.txt").unwrap();
        assert_eq!(joined.as_str(), "http://origin.example/tree/a/b.txt");
    }

    #[tokio::test]
    async fn test_fs_fetch_full() {
        let origin = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        tokio::fs::write(origin.path().join("a.txt"), b"0123456789")
            .await
            .unwrap();

        let transport = FsTransport::new(origin.path());
        let dest = local.path().join("a.txt");
        let outcome = transport.fetch("a.txt", &dest, 0).await.unwrap();

        assert_eq!(outcome.resumed_from, 0);
        assert_eq!(outcome.bytes_fetched, 10);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_fs_fetch_resumes_from_offset() {
        let origin = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        tokio::fs::write(origin.path().join("a.txt"), b"0123456789")
            .await
            .unwrap();
        // 4 bytes already present locally
        let dest = local.path().join("a.txt");
        tokio::fs::write(&dest, b"0123").await.unwrap();

        let transport = FsTransport::new(origin.path());
        let outcome = transport.fetch("a.txt", &dest, 4).await.unwrap();

        assert_eq!(outcome.resumed_from, 4);
        assert_eq!(outcome.bytes_fetched, 6);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_fs_fetch_not_found() {
        let origin = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();

        let transport = FsTransport::new(origin.path());
        let err = transport
            .fetch("missing.txt", &local.path().join("missing.txt"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fs_fetch_offset_past_end_restarts() {
        let origin = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        tokio::fs::write(origin.path().join("a.txt"), b"0123456789")
            .await
            .unwrap();
        let dest = local.path().join("a.txt");
        tokio::fs::write(&dest, b"x".repeat(20)).await.unwrap();

        let transport = FsTransport::new(origin.path());
        let outcome = transport.fetch("a.txt", &dest, 20).await.unwrap();

        assert_eq!(outcome.resumed_from, 0);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"0123456789");
    }
}

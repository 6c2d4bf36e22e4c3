//! Origin HTTP server
//!
//! Publishes a synchronized tree over HTTP: the tree's files, plus the
//! log/meta pair, served statically. `ServeDir` answers range requests, which
//! is what consumers use to resume interrupted downloads.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::routing::get;
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the origin router for a tree root.
pub fn router(root: impl Into<PathBuf>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .fallback_service(ServeDir::new(root.into()))
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

/// Serve a tree until the task is cancelled.
pub async fn serve(root: &Path, bind: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(root = %root.display(), addr = %listener.local_addr()?, "origin serving");
    axum::serve(listener, router(root)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_healthz() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path());

        let response = app
            .oneshot(
                http::Request::builder()
                    .uri("/healthz")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_serves_tree_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b/c.txt"), b"gamma").unwrap();

        let app = router(dir.path());
        let response = app
            .oneshot(
                http::Request::builder()
                    .uri("/b/c.txt")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"gamma");
    }

    #[tokio::test]
    async fn test_range_request_for_resume() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();

        let app = router(dir.path());
        let response = app
            .oneshot(
                http::Request::builder()
                    .uri("/a.txt")
                    .header(http::header::RANGE, "bytes=4-")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::PARTIAL_CONTENT);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"456789");
    }

    #[tokio::test]
    async fn test_missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path());

        let response = app
            .oneshot(
                http::Request::builder()
                    .uri("/nope.txt")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
    }
}

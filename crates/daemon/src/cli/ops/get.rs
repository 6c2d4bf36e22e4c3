use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;
use url::Url;

use common::{CacheError, HttpTransport, LocalStore, RemoteCache, TreePath, TreePathError};

use super::update::{resolve_origin, UpdateError};

#[derive(Args, Debug, Clone)]
pub struct Get {
    /// Tree path to fetch (portable slash-separated form)
    pub path: String,

    /// Local cache directory (default: configured cache_root)
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Origin base URL (default: configured origin)
    #[arg(long)]
    pub origin: Option<Url>,

    /// Mark the path online-only: repair passes will not keep it cached
    #[arg(long)]
    pub online: bool,
}

#[derive(Debug)]
pub struct GetOutput {
    pub path: TreePath,
    pub size: u64,
    pub location: PathBuf,
}

impl fmt::Display for GetOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {} ({} bytes)",
            "Fetched".green().bold(),
            self.path.to_string().bold(),
            self.size
        )?;
        write!(f, "  {} {}", "Cached at:".dimmed(), self.location.display())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GetError {
    #[error("invalid path: {0}")]
    Path(#[from] TreePathError),

    #[error(transparent)]
    Origin(#[from] UpdateError),

    #[error("get failed: {0}")]
    Cache(#[from] CacheError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Get {
    type Error = GetError;
    type Output = GetOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let path: TreePath = self.path.parse()?;
        let cache_root = self
            .cache
            .clone()
            .unwrap_or_else(|| ctx.config.cache_root.clone());
        let origin = resolve_origin(&self.origin, &ctx.config.origin)?;

        let cache = RemoteCache::open(
            LocalStore::new(&cache_root),
            HttpTransport::new(origin),
        )
        .await?;
        if self.online {
            cache.mark_online(path.clone());
        }
        cache.get(&path, false).await?;
        let stat = cache.store().stat(&path).await.map_err(CacheError::Storage)?;

        Ok(GetOutput {
            location: cache.store().native(&path),
            path,
            size: stat.size,
        })
    }
}

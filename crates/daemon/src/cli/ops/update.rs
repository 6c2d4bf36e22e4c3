use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;
use url::Url;

use common::{CacheError, HttpTransport, LocalStore, RemoteCache, UpdateOutcome};

#[derive(Args, Debug, Clone)]
pub struct Update {
    /// Local cache directory (default: configured cache_root)
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Origin base URL (default: configured origin)
    #[arg(long)]
    pub origin: Option<Url>,
}

#[derive(Debug)]
pub struct UpdateOutput {
    pub outcome: UpdateOutcome,
}

impl fmt::Display for UpdateOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            UpdateOutcome::Unchanged => {
                write!(f, "{}", "Already up to date".green().bold())
            }
            UpdateOutcome::Updated { revision, repair } => {
                writeln!(
                    f,
                    "{} to revision {}",
                    "Updated".green().bold(),
                    revision.to_string().bold()
                )?;
                writeln!(f, "  {} {}", "Untracked removed:".dimmed(), repair.untracked)?;
                writeln!(f, "  {} {}", "Corrupt removed:".dimmed(), repair.corrupt)?;
                writeln!(
                    f,
                    "  {} {}",
                    "Online-only removed:".dimmed(),
                    repair.online_only
                )?;
                write!(f, "  {} {}", "Directories pruned:".dimmed(), repair.pruned_dirs)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("missing required config: origin url")]
    MissingOrigin,

    #[error("update failed: {0}")]
    Cache(#[from] CacheError),
}

pub(crate) fn resolve_origin(
    flag: &Option<Url>,
    config: &Option<Url>,
) -> Result<Url, UpdateError> {
    flag.clone()
        .or_else(|| config.clone())
        .ok_or(UpdateError::MissingOrigin)
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Update {
    type Error = UpdateError;
    type Output = UpdateOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let cache_root = self
            .cache
            .clone()
            .unwrap_or_else(|| ctx.config.cache_root.clone());
        let origin = resolve_origin(&self.origin, &ctx.config.origin)?;

        tokio::fs::create_dir_all(&cache_root)
            .await
            .map_err(CacheError::Storage)?;
        let cache = RemoteCache::open(
            LocalStore::new(&cache_root),
            HttpTransport::new(origin),
        )
        .await?;
        let outcome = cache.update().await?;

        Ok(UpdateOutput { outcome })
    }
}

use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use common::{ChangeLog, ChangeLogError};

#[derive(Args, Debug, Clone)]
pub struct Status {
    /// Tree or cache root to inspect (default: configured tree_root)
    #[arg(long)]
    pub root: Option<PathBuf>,
}

#[derive(Debug)]
pub struct StatusOutput {
    pub root: PathBuf,
    pub revision: u64,
    pub entries: usize,
    pub tracked: usize,
    pub log_size: u64,
}

impl fmt::Display for StatusOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.root.display().to_string().bold())?;
        writeln!(f, "  {} {}", "Revision:".dimmed(), self.revision)?;
        writeln!(f, "  {} {}", "Log entries:".dimmed(), self.entries)?;
        writeln!(f, "  {} {}", "Tracked files:".dimmed(), self.tracked)?;
        write!(f, "  {} {} bytes", "Log size:".dimmed(), self.log_size)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("status failed: {0}")]
    Log(#[from] ChangeLogError),

    #[error("status failed: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Status {
    type Error = StatusError;
    type Output = StatusOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let root = self
            .root
            .clone()
            .unwrap_or_else(|| ctx.config.tree_root.clone());

        let mut log = ChangeLog::new(&root);
        log.load().await?;
        let log_size = match tokio::fs::metadata(log.log_path()).await {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => return Err(err.into()),
        };

        Ok(StatusOutput {
            root,
            revision: log.revision(),
            entries: log.entries().len(),
            tracked: log.tracked_count(),
            log_size,
        })
    }
}

use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use common::{ChangeLog, ChangeLogError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Tree root to initialize (default: configured tree_root)
    #[arg(long)]
    pub root: Option<PathBuf>,
}

#[derive(Debug)]
pub struct InitOutput {
    pub root: PathBuf,
    pub revision: u64,
    pub tracked: usize,
}

impl fmt::Display for InitOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} change log at {}",
            "Initialized".green().bold(),
            self.root.display().to_string().bold()
        )?;
        writeln!(f, "  {} {}", "Revision:".dimmed(), self.revision)?;
        write!(f, "  {} {}", "Tracked files:".dimmed(), self.tracked)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    Log(#[from] ChangeLogError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = InitOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let root = self
            .root
            .clone()
            .unwrap_or_else(|| ctx.config.tree_root.clone());

        let mut log = ChangeLog::new(&root);
        let revision = log.create().await?;

        Ok(InitOutput {
            root,
            revision,
            tracked: log.tracked_count(),
        })
    }
}

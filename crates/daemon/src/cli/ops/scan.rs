use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use common::{ChangeLog, ChangeLogError, ScanError, TreeScanner};

#[derive(Args, Debug, Clone)]
pub struct Scan {
    /// Tree root to reconcile (default: configured tree_root)
    #[arg(long)]
    pub root: Option<PathBuf>,
}

#[derive(Debug)]
pub struct ScanOutput {
    pub root: PathBuf,
    pub added: usize,
    pub removed: usize,
    pub revision: u64,
    pub tracked: usize,
}

impl fmt::Display for ScanOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {}",
            "Reconciled".green().bold(),
            self.root.display().to_string().bold()
        )?;
        writeln!(f, "  {} {}", "Added:".dimmed(), self.added)?;
        writeln!(f, "  {} {}", "Removed:".dimmed(), self.removed)?;
        writeln!(f, "  {} {}", "Revision:".dimmed(), self.revision)?;
        write!(f, "  {} {}", "Tracked files:".dimmed(), self.tracked)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanOpError {
    #[error("scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("scan failed: {0}")]
    Log(#[from] ChangeLogError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Scan {
    type Error = ScanOpError;
    type Output = ScanOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let root = self
            .root
            .clone()
            .unwrap_or_else(|| ctx.config.tree_root.clone());

        let mut log = ChangeLog::new(&root);
        log.load().await?;
        let summary = TreeScanner::new(&root).reconcile(&mut log).await?;

        Ok(ScanOutput {
            root,
            added: summary.added,
            removed: summary.removed,
            revision: summary.revision,
            tracked: log.tracked_count(),
        })
    }
}

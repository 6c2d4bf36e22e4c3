use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use owo_colors::OwoColorize;
use tracing::info;

use common::{
    spawn_watcher, ChangeLog, ChangeLogError, ScanError, TreeScanner, WatchError, WatcherBridge,
};

#[derive(Args, Debug, Clone)]
pub struct Watch {
    /// Tree root to watch (default: configured tree_root)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Seconds between healing reconciliation passes
    #[arg(long)]
    pub scan_interval: Option<u64>,
}

#[derive(Debug)]
pub struct WatchOutput {
    pub batches: u64,
    pub heals: u64,
    pub revision: u64,
}

impl fmt::Display for WatchOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "Watch stopped".green().bold())?;
        writeln!(f, "  {} {}", "Batches applied:".dimmed(), self.batches)?;
        writeln!(f, "  {} {}", "Heal passes:".dimmed(), self.heals)?;
        write!(f, "  {} {}", "Revision:".dimmed(), self.revision)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatchOpError {
    #[error("watch failed: {0}")]
    Watch(#[from] WatchError),

    #[error("watch failed: {0}")]
    Scan(#[from] ScanError),

    #[error("watch failed: {0}")]
    Log(#[from] ChangeLogError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Watch {
    type Error = WatchOpError;
    type Output = WatchOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let root = self
            .root
            .clone()
            .unwrap_or_else(|| ctx.config.tree_root.clone());
        let interval = self
            .scan_interval
            .unwrap_or(ctx.config.scan_interval_secs)
            .max(1);

        let mut log = ChangeLog::new(&root);
        log.create().await?;

        // full pass first so the log reflects the tree before we go incremental
        let scanner = TreeScanner::new(&root);
        scanner.reconcile(&mut log).await?;

        let (watcher, events) = spawn_watcher(&root)?;
        let mut bridge = WatcherBridge::new(&root, log);
        info!(root = %root.display(), interval, "watching");

        let mut ticker = tokio::time::interval(Duration::from_secs(interval));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut batches = 0u64;
        let mut heals = 0u64;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv_async() => {
                    let Ok(first) = event else { break };
                    let mut batch = vec![first];
                    while let Ok(next) = events.try_recv() {
                        batch.push(next);
                    }
                    bridge.apply_batch(batch).await?;
                    batches += 1;
                }
                _ = ticker.tick() => {
                    scanner.reconcile(bridge.log_mut()).await?;
                    heals += 1;
                }
            }
        }
        drop(watcher);

        let log = bridge.into_log();
        Ok(WatchOutput {
            batches,
            heals,
            revision: log.revision(),
        })
    }
}

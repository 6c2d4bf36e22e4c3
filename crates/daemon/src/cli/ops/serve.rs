use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

#[derive(Args, Debug, Clone)]
pub struct Serve {
    /// Tree root to publish (default: configured tree_root)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Bind address (default: configured bind)
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

#[derive(Debug)]
pub struct ServeOutput;

impl fmt::Display for ServeOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", "Origin stopped".green().bold())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("serve failed: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Serve {
    type Error = ServeError;
    type Output = ServeOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let root = self
            .root
            .clone()
            .unwrap_or_else(|| ctx.config.tree_root.clone());
        let bind = self.bind.unwrap_or(ctx.config.bind);

        tokio::select! {
            result = treesync_daemon::serve::serve(&root, bind) => result?,
            _ = tokio::signal::ctrl_c() => {}
        }
        Ok(ServeOutput)
    }
}

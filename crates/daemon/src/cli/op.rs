use std::fmt::Display;

use treesync_daemon::Config;

/// Shared context for CLI operations.
pub struct OpContext {
    pub config: Config,
}

/// One CLI operation: typed arguments in, displayable output or a typed
/// error out.
#[async_trait::async_trait]
pub trait Op {
    type Error: std::error::Error;
    type Output: Display;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

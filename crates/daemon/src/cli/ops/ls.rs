use std::fmt;
use std::path::PathBuf;

use clap::Args;
use comfy_table::{presets, Table};

use common::{ChangeLog, ChangeLogError};

#[derive(Args, Debug, Clone)]
pub struct Ls {
    /// Tree or cache root to list (default: configured tree_root)
    #[arg(long)]
    pub root: Option<PathBuf>,
}

#[derive(Debug)]
pub struct LsOutput {
    pub rows: Vec<(String, String, u64)>,
}

impl fmt::Display for LsOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut table = Table::new();
        table.load_preset(presets::UTF8_BORDERS_ONLY);
        table.set_header(vec!["Path", "Digest", "Size"]);
        for (path, digest, size) in &self.rows {
            table.add_row(vec![path.clone(), digest.clone(), size.to_string()]);
        }
        write!(f, "{table}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LsError {
    #[error("ls failed: {0}")]
    Log(#[from] ChangeLogError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Ls {
    type Error = LsError;
    type Output = LsOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let root = self
            .root
            .clone()
            .unwrap_or_else(|| ctx.config.tree_root.clone());

        let mut log = ChangeLog::new(&root);
        log.load().await?;

        let rows = log
            .iter()
            .map(|(path, (digest, size))| {
                let hex = digest.to_hex();
                (path.to_string(), hex[..16].to_string(), *size)
            })
            .collect();

        Ok(LsOutput { rows })
    }
}

pub mod op;
pub mod ops;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;

use treesync_daemon::Config;

use op::{Op, OpContext};

#[derive(Parser, Debug)]
#[command(
    name = "treesync",
    version,
    about = "File tree synchronization over an append-only change log"
)]
pub struct Cli {
    /// Path to a treesync.toml config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the change log pair for a tree
    Init(ops::Init),
    /// Run one full reconciliation pass against the live tree
    Scan(ops::Scan),
    /// Watch a tree and record changes as they happen
    Watch(ops::Watch),
    /// Publish a tree as an origin over HTTP
    Serve(ops::Serve),
    /// Pull a fresh snapshot from the origin and repair the cache
    Update(ops::Update),
    /// Lazily fetch one file into the cache
    Get(ops::Get),
    /// Show revision and tracking summary
    Status(ops::Status),
    /// List tracked files
    Ls(ops::Ls),
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let ctx = OpContext { config };

    match cli.command {
        Command::Init(op) => dispatch(op, &ctx).await,
        Command::Scan(op) => dispatch(op, &ctx).await,
        Command::Watch(op) => dispatch(op, &ctx).await,
        Command::Serve(op) => dispatch(op, &ctx).await,
        Command::Update(op) => dispatch(op, &ctx).await,
        Command::Get(op) => dispatch(op, &ctx).await,
        Command::Status(op) => dispatch(op, &ctx).await,
        Command::Ls(op) => dispatch(op, &ctx).await,
    }
}

async fn dispatch<O: Op>(op: O, ctx: &OpContext) -> anyhow::Result<()> {
    match op.execute(ctx).await {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            std::process::exit(1);
        }
    }
}

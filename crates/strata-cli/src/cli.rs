use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Strata: signed checkpoints with tiered recovery",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (defaults to ./strata.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the configured data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// State reference recorded in new snapshots
    #[arg(long, global = true, conflicts_with = "state_file")]
    pub state_ref: Option<String>,

    /// Record a content digest of this file as the state reference
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a checkpoint of the current state
    Checkpoint(CheckpointArgs),
    /// Roll back to a checkpoint (newest trustworthy one by default)
    Rollback(RollbackArgs),
    /// Show tier counts and the active checkpoint
    Status,
    /// List checkpoints in the primary store, newest first
    List(ListArgs),
    /// Show a verified checkpoint, recovering it if needed
    Show(IdArgs),
    /// Verify every stored copy of a checkpoint
    Verify(IdArgs),
    /// Take scheduled checkpoints until interrupted
    Run(RunArgs),
    /// Remove ghost archive records
    PurgeGhosts(PurgeArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct CheckpointArgs {
    /// Free-text description
    #[arg(default_value = "")]
    pub description: String,
}

#[derive(Args)]
pub struct RollbackArgs {
    /// Target checkpoint id (64 hex characters)
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}

#[derive(Args)]
pub struct IdArgs {
    pub id: String,
}

#[derive(Args)]
pub struct RunArgs {
    /// Interval in seconds, overriding the config
    #[arg(long)]
    pub interval: Option<u64>,
}

#[derive(Args)]
pub struct PurgeArgs {
    /// Only purge records of this checkpoint
    #[arg(long)]
    pub id: Option<String>,
    /// Required to purge the whole archive
    #[arg(long)]
    pub all: bool,
}

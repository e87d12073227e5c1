//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};

// Re-export command types for convenience
pub use crate::commands::backup::BackupArgs;
pub use crate::commands::manifest::ManifestCommands;
pub use crate::commands::prune::PruneArgs;
pub use crate::commands::restore::RestoreArgs;

/// Ritual - backups for long-running game server worlds
#[derive(Parser, Debug)]
#[command(name = "ritual")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to ritual.yaml config file
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Archive world directories into a backup target
    Backup(BackupArgs),

    /// Download and extract a stored backup
    Restore(RestoreArgs),

    /// Apply the retention policy of a backup target
    Prune(PruneArgs),

    /// Inspect or lock the manifest
    #[command(subcommand)]
    Manifest(ManifestCommands),
}

/// Which backup target a command works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TargetKind {
    /// Flat, monthly-throttled backups on the local disk
    Local,
    /// Durable object storage
    Remote,
}

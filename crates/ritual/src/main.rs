//! Ritual CLI - world backups, restores and retention
//!
//! This is the main entry point for the ritual command-line interface.

mod cli;
mod commands;
mod context;
mod output;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    // Ctrl-C cancels whatever is running; the command decides how to unwind
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            output::warning("Interrupted, cancelling...");
            on_interrupt.cancel();
        }
    });

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Backup(args) => commands::backup::run(args, config, cancel).await,
        Commands::Restore(args) => commands::restore::run(args, config, cancel).await,
        Commands::Prune(args) => commands::prune::run(args, config).await,
        Commands::Manifest(command) => commands::manifest::run(command, config).await,
    }
}

/// Initialize tracing with appropriate verbosity
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

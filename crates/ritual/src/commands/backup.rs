//! Backup command

use anyhow::{Context as _, Result};
use camino::Utf8Path;
use clap::Args;
use indicatif::HumanBytes;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use super::{load_manifest, prune_target, store_manifest};
use crate::cli::TargetKind;
use crate::context::AppContext;
use crate::output;

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Backup target
    #[arg(short, long, value_enum, default_value = "remote")]
    pub target: TargetKind,

    /// World name used in the backup key
    #[arg(short, long)]
    pub name: String,

    /// Directories to archive, each stored under its base name
    #[arg(required = true)]
    pub dirs: Vec<PathBuf>,

    /// Skip the retention sweep after a successful backup
    #[arg(long)]
    pub no_prune: bool,
}

pub async fn run(args: BackupArgs, config: Option<&Utf8Path>, cancel: CancellationToken) -> Result<()> {
    let ctx = AppContext::load(config)?;
    output::header(&format!("Backup {}", args.name));

    let target = ctx.target(args.target).await?;
    let Some(pushed) = target
        .backup(&args.dirs, &args.name, &cancel)
        .await
        .with_context(|| format!("Backup to {} target failed", target.label()))?
    else {
        output::info("A local backup already exists this month, nothing to do");
        return Ok(());
    };

    let mut manifest = load_manifest(&ctx).await?;
    target.record_world(&mut manifest, &pushed)?;

    // local copies of remote backups are tracked so dangling cleanup keeps them
    if let Some(copy) = &pushed.local_path {
        if let Some(key) = ctx.local_target()?.key_for_copy(copy) {
            manifest.add_world(ritual_core::World::new(&key, chrono::Utc::now())?);
        }
    }

    if !args.no_prune {
        prune_target(target.as_ref(), &mut manifest).await?;
    }
    store_manifest(&ctx, &manifest).await?;

    output::success(&format!("Backed up {}", args.name));
    output::kv("Key", &pushed.key);
    output::kv("Size", &HumanBytes(pushed.size).to_string());
    output::kv("SHA256", &pushed.checksum);
    if let Some(copy) = &pushed.local_path {
        output::kv("Local copy", &copy.display().to_string());
    }
    Ok(())
}

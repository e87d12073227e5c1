//! Restore command

use anyhow::{anyhow, Context as _, Result};
use camino::Utf8Path;
use clap::Args;
use ritual_backup::{ConflictStrategy, PullRequest};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use super::load_manifest;
use crate::cli::TargetKind;
use crate::context::AppContext;
use crate::output;

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Backup key; defaults to the latest world in the manifest
    #[arg(short, long)]
    pub key: Option<String>,

    /// Directory to extract into
    #[arg(short, long)]
    pub dest: PathBuf,

    /// Target holding the backup
    #[arg(short, long, value_enum, default_value = "remote")]
    pub target: TargetKind,

    /// What to do with existing files (replace, skip, backup, fail)
    #[arg(long, default_value = "skip")]
    pub conflict: String,

    /// Only restore entries under these archive paths
    #[arg(long)]
    pub include: Vec<PathBuf>,
}

pub async fn run(args: RestoreArgs, config: Option<&Utf8Path>, cancel: CancellationToken) -> Result<()> {
    let ctx = AppContext::load(config)?;
    let conflict: ConflictStrategy = args.conflict.parse()?;

    let key = match args.key {
        Some(key) => key,
        None => latest_key(&ctx, args.target).await?,
    };

    output::header("Restore");
    output::kv("Key", &key);
    output::kv("Destination", &args.dest.display().to_string());
    output::kv("Conflicts", conflict.as_str());

    let mut request =
        PullRequest::new(ctx.bucket_for(args.target), &key, &args.dest).with_conflict(conflict);
    if !args.include.is_empty() {
        let include = args.include;
        request = request.with_filter(move |path| include.iter().any(|p| path.starts_with(p)));
    }

    let pulled = ctx
        .pipeline_for(args.target)
        .await?
        .pull(request, &cancel)
        .await
        .with_context(|| format!("Failed to restore {}", key))?;

    output::success(&format!("Restored {} files", pulled.restored.len()));
    output::kv("Directories", &pulled.directories.to_string());
    if !pulled.skipped.is_empty() {
        output::kv("Skipped", &pulled.skipped.len().to_string());
    }
    for path in &pulled.backed_up {
        output::kv("Backed up", &path.display().to_string());
    }
    Ok(())
}

/// Newest world recorded for the target of `kind`.
///
/// The manifest tracks worlds of every target, so only keys below the
/// target's backup directory are candidates.
async fn latest_key(ctx: &AppContext, kind: TargetKind) -> Result<String> {
    let backup_dir = ctx.backup_dir_for(kind);
    load_manifest(ctx)
        .await?
        .latest_world_under(backup_dir)
        .map(|w| w.uri().to_string())
        .ok_or_else(|| anyhow!("Manifest has no worlds under {}; pass --key", backup_dir))
}

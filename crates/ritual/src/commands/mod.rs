//! Command implementations

pub mod backup;
pub mod manifest;
pub mod prune;
pub mod restore;

use anyhow::{Context as _, Result};
use ritual_backup::{fetch_manifest, save_manifest, BackupTarget};
use ritual_core::Manifest;

use crate::context::AppContext;
use crate::output;

/// Reads the shared manifest from the remote bucket.
pub(crate) async fn load_manifest(ctx: &AppContext) -> Result<Manifest> {
    let storage = ctx.remote_storage().await?;
    fetch_manifest(storage.as_ref(), &ctx.config.manifest_key)
        .await
        .context("Failed to read manifest")
}

pub(crate) async fn store_manifest(ctx: &AppContext, manifest: &Manifest) -> Result<()> {
    let storage = ctx.remote_storage().await?;
    save_manifest(storage.as_ref(), &ctx.config.manifest_key, manifest)
        .await
        .context("Failed to write manifest")
}

/// Applies retention on `target` and drops the deleted keys from `manifest`.
///
/// Returns the number of backups removed.
pub(crate) async fn prune_target(
    target: &dyn BackupTarget,
    manifest: &mut Manifest,
) -> Result<usize> {
    let deleted = target
        .data_retention(manifest)
        .await
        .with_context(|| format!("Retention failed on {} target", target.label()))?;

    let forgotten = manifest.forget_worlds(&deleted);
    if !forgotten.is_empty() {
        tracing::debug!("Dropped {} worlds from manifest", forgotten.len());
    }
    for key in &deleted {
        output::info(&format!("Deleted {}", key));
    }
    Ok(deleted.len())
}

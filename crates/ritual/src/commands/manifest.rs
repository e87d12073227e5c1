//! Manifest inspection and locking

use anyhow::{bail, Result};
use camino::Utf8Path;
use clap::Subcommand;
use ritual_core::LockToken;

use super::{load_manifest, store_manifest};
use crate::context::AppContext;
use crate::output;

#[derive(Subcommand, Debug)]
pub enum ManifestCommands {
    /// Print the manifest
    Show,

    /// Take the advisory lock for this machine
    Lock {
        /// Take the lock even if another machine holds it
        #[arg(long)]
        force: bool,
    },

    /// Release the advisory lock
    Unlock,
}

pub async fn run(command: ManifestCommands, config: Option<&Utf8Path>) -> Result<()> {
    let ctx = AppContext::load(config)?;
    match command {
        ManifestCommands::Show => show(&ctx).await,
        ManifestCommands::Lock { force } => lock(&ctx, force).await,
        ManifestCommands::Unlock => unlock(&ctx).await,
    }
}

async fn show(ctx: &AppContext) -> Result<()> {
    let manifest = load_manifest(ctx).await?;

    output::header("Manifest");
    output::kv("Ritual version", &manifest.ritual_version);
    if !manifest.instance_version.is_empty() {
        output::kv("Instance version", &manifest.instance_version);
    }
    output::kv("Updated", &manifest.updated_at.to_rfc3339());
    output::kv("Lock", &describe_lock(&manifest.locked_by));

    output::header(&format!("Worlds ({})", manifest.worlds.len()));
    for world in &manifest.worlds {
        output::kv(&world.created_at().to_rfc3339(), world.uri());
    }
    Ok(())
}

async fn lock(ctx: &AppContext, force: bool) -> Result<()> {
    let mut manifest = load_manifest(ctx).await?;
    if manifest.is_locked() && !force {
        bail!(
            "Manifest is locked ({}); use --force to take it over",
            describe_lock(&manifest.locked_by)
        );
    }

    let token = LockToken::new(ctx.config.machine_id.as_str())?;
    manifest.lock(token.to_string());
    store_manifest(ctx, &manifest).await?;
    output::success(&format!("Locked by {}", token.machine));
    Ok(())
}

async fn unlock(ctx: &AppContext) -> Result<()> {
    let mut manifest = load_manifest(ctx).await?;
    if !manifest.is_locked() {
        output::info("Manifest is not locked");
        return Ok(());
    }
    manifest.unlock();
    store_manifest(ctx, &manifest).await?;
    output::success("Unlocked");
    Ok(())
}

fn describe_lock(locked_by: &str) -> String {
    if locked_by.is_empty() {
        return "unlocked".to_string();
    }
    match LockToken::parse(locked_by) {
        Ok(token) => format!("{} since {}", token.machine, token.acquired_at.to_rfc3339()),
        Err(_) => locked_by.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_lock() {
        assert_eq!(describe_lock(""), "unlocked");
        assert!(describe_lock("node-1::1704067200").starts_with("node-1 since 2024-01-01"));
        assert_eq!(describe_lock("garbage"), "garbage");
    }
}

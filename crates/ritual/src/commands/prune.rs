//! Prune command

use anyhow::Result;
use camino::Utf8Path;
use clap::Args;

use super::{load_manifest, prune_target, store_manifest};
use crate::cli::TargetKind;
use crate::context::AppContext;
use crate::output;

#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Target to apply retention on
    #[arg(short, long, value_enum, default_value = "remote")]
    pub target: TargetKind,
}

pub async fn run(args: PruneArgs, config: Option<&Utf8Path>) -> Result<()> {
    let ctx = AppContext::load(config)?;
    output::header("Prune");

    let target = ctx.target(args.target).await?;
    let mut manifest = load_manifest(&ctx).await?;
    let deleted = prune_target(target.as_ref(), &mut manifest).await?;

    if deleted == 0 {
        output::info("Nothing to prune");
        return Ok(());
    }
    store_manifest(&ctx, &manifest).await?;
    output::success(&format!("Deleted {} backups", deleted));
    Ok(())
}

//! Backup targets.
//!
//! A target owns a naming scheme, a write policy and a retention policy for
//! one place backups are kept. [`LocalTarget`] writes flat, monthly-throttled
//! backups to the local disk; [`RemoteTarget`] writes one backup per call to
//! the durable store, grouped by world name.
//!
//! The storage handed to a target must address the same bucket its pipeline
//! uploads to: keys returned by discovery are the keys the pipeline wrote.

mod local;
mod remote;
mod store;

pub use local::LocalTarget;
pub use remote::{LocalCopyPolicy, RemoteTarget};
pub use store::{BackupFile, BackupStore, KeyLayout};

use crate::archive::PushResult;
use async_trait::async_trait;
use chrono::Utc;
use ritual_core::{Manifest, Result, World};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait BackupTarget: Send + Sync {
    /// Short label used in logs and events.
    fn label(&self) -> &'static str;

    /// Bucket the target uploads to.
    fn bucket(&self) -> &str;

    /// Archives `dirs` as a new backup of `name`.
    ///
    /// Returns `Ok(None)` when the target's policy skipped the write.
    async fn backup(
        &self,
        dirs: &[PathBuf],
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<PushResult>>;

    /// Applies the target's retention policy; returns the deleted keys.
    async fn data_retention(&self, manifest: &Manifest) -> Result<Vec<String>>;

    /// Valid stored backups, newest first.
    async fn backup_files(&self) -> Result<Vec<BackupFile>>;

    /// Records a finished push as a world in `manifest`.
    fn record_world(&self, manifest: &mut Manifest, pushed: &PushResult) -> Result<World> {
        let world = World::new(&pushed.key, Utc::now())?;
        manifest.add_world(world.clone());
        Ok(world)
    }
}

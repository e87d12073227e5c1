//! Wiring from configuration to targets, storages and transports.

use anyhow::{Context as _, Result};
use camino::Utf8Path;
use ritual_backup::{
    ArchivePipeline, BackupTarget, LocalCopyPolicy, LocalTarget, PipelineSettings, RemoteTarget,
};
use ritual_core::{
    EventSink, FsStorage, FsTransport, RemoteBackend, RitualConfig, Storage, Transport,
};
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::TargetKind;
use crate::output::ProgressSink;

/// Loaded configuration plus the event sink shared by every component.
pub struct AppContext {
    pub config: RitualConfig,
    pub events: Arc<dyn EventSink>,
}

impl AppContext {
    pub fn load(config_path: Option<&Utf8Path>) -> Result<Self> {
        let config = RitualConfig::load(config_path).context("Failed to load configuration")?;
        Ok(Self::new(config, Arc::new(ProgressSink::new())))
    }

    pub fn new(config: RitualConfig, events: Arc<dyn EventSink>) -> Self {
        Self { config, events }
    }

    /// Directory backing the local bucket.
    pub fn local_bucket_dir(&self) -> PathBuf {
        self.config
            .root
            .as_std_path()
            .join(&self.config.local.bucket)
    }

    pub fn local_pipeline(&self) -> ArchivePipeline {
        let transport = FsTransport::new(self.config.root.as_std_path())
            .with_events(self.events.clone())
            .with_interval(self.config.progress_interval());
        self.pipeline(Arc::new(transport))
    }

    pub async fn remote_pipeline(&self) -> Result<ArchivePipeline> {
        Ok(self.pipeline(self.remote_transport().await?))
    }

    pub fn local_target(&self) -> Result<LocalTarget> {
        let local = &self.config.local;
        let storage = Arc::new(FsStorage::new(self.local_bucket_dir()));
        LocalTarget::new(
            self.local_pipeline(),
            storage,
            &local.bucket,
            &local.backup_dir,
            &self.config.archive.extension,
            local.max_backups,
        )
        .context("Failed to set up local target")
    }

    /// Remote target; with `keep_local_copy` set, copies land in the local
    /// backup directory unless the local target is throttled this month.
    pub async fn remote_target(&self) -> Result<RemoteTarget> {
        let remote = &self.config.remote;
        let target = RemoteTarget::new(
            self.remote_pipeline().await?,
            self.remote_storage().await?,
            &remote.bucket,
            &remote.backup_dir,
            &self.config.archive.extension,
            remote.max_backups,
        )
        .context("Failed to set up remote target")?;

        if !remote.keep_local_copy {
            return Ok(target);
        }

        let throttled = self.local_target()?.is_throttled().await?;
        let directory = self.local_bucket_dir().join(&self.config.local.backup_dir);
        Ok(target.with_local_copy(LocalCopyPolicy::new(directory).with_predicate(move || !throttled)))
    }

    pub async fn target(&self, kind: TargetKind) -> Result<Box<dyn BackupTarget>> {
        let target: Box<dyn BackupTarget> = match kind {
            TargetKind::Local => Box::new(self.local_target()?),
            TargetKind::Remote => Box::new(self.remote_target().await?),
        };
        Ok(target)
    }

    pub async fn pipeline_for(&self, kind: TargetKind) -> Result<ArchivePipeline> {
        match kind {
            TargetKind::Local => Ok(self.local_pipeline()),
            TargetKind::Remote => self.remote_pipeline().await,
        }
    }

    /// Bucket a target of `kind` reads from.
    pub fn bucket_for(&self, kind: TargetKind) -> &str {
        match kind {
            TargetKind::Local => &self.config.local.bucket,
            TargetKind::Remote => &self.config.remote.bucket,
        }
    }

    /// Backup directory keys of a target of `kind` live under.
    pub fn backup_dir_for(&self, kind: TargetKind) -> &str {
        match kind {
            TargetKind::Local => &self.config.local.backup_dir,
            TargetKind::Remote => &self.config.remote.backup_dir,
        }
    }

    /// Storage of the remote bucket, which also holds the manifest.
    pub async fn remote_storage(&self) -> Result<Arc<dyn Storage>> {
        let remote = &self.config.remote;
        match remote.backend {
            RemoteBackend::Filesystem => Ok(Arc::new(FsStorage::new(
                self.config.remote_root().as_std_path().join(&remote.bucket),
            ))),
            RemoteBackend::S3 => self.s3_storage().await,
        }
    }

    async fn remote_transport(&self) -> Result<Arc<dyn Transport>> {
        match self.config.remote.backend {
            RemoteBackend::Filesystem => Ok(Arc::new(
                FsTransport::new(self.config.remote_root().as_std_path())
                    .with_events(self.events.clone())
                    .with_interval(self.config.progress_interval()),
            )),
            RemoteBackend::S3 => self.s3_transport().await,
        }
    }

    fn pipeline(&self, transport: Arc<dyn Transport>) -> ArchivePipeline {
        ArchivePipeline::new(transport, self.events.clone())
            .with_settings(PipelineSettings::from(&self.config.archive))
    }

    #[cfg(feature = "s3")]
    async fn s3_storage(&self) -> Result<Arc<dyn Storage>> {
        let remote = &self.config.remote;
        let storage = ritual_core::storage::S3Storage::from_params(
            &remote.bucket,
            &remote.region,
            remote.endpoint.as_deref(),
        )
        .await
        .context("Failed to create S3 storage")?;
        Ok(Arc::new(storage))
    }

    #[cfg(feature = "s3")]
    async fn s3_transport(&self) -> Result<Arc<dyn Transport>> {
        let remote = &self.config.remote;
        let transport = ritual_core::transport::S3Transport::from_params(
            &remote.region,
            remote.endpoint.as_deref(),
        )
        .await
        .with_events(self.events.clone())
        .with_interval(self.config.progress_interval());
        Ok(Arc::new(transport))
    }

    #[cfg(not(feature = "s3"))]
    async fn s3_storage(&self) -> Result<Arc<dyn Storage>> {
        anyhow::bail!("remote.backend is s3 but ritual was built without the `s3` feature")
    }

    #[cfg(not(feature = "s3"))]
    async fn s3_transport(&self) -> Result<Arc<dyn Transport>> {
        anyhow::bail!("remote.backend is s3 but ritual was built without the `s3` feature")
    }
}

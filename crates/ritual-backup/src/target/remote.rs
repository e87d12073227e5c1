//! Remote target: grouped keys, a new backup on every call.

use super::{BackupFile, BackupStore, BackupTarget, KeyLayout};
use crate::archive::{ArchivePipeline, LocalCopy, PushRequest, PushResult};
use crate::retention::{Retention, RetentionPolicy};
use async_trait::async_trait;
use chrono::Utc;
use ritual_core::{Manifest, Result, Storage};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where and when a remote backup also lands on the local disk.
#[derive(Clone)]
pub struct LocalCopyPolicy {
    /// Directory receiving `<unixSeconds>_<name>.<ext>` copies
    pub directory: PathBuf,
    pub should_backup: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl LocalCopyPolicy {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            should_backup: None,
        }
    }

    pub fn with_predicate(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.should_backup = Some(Arc::new(predicate));
        self
    }
}

pub struct RemoteTarget {
    pipeline: ArchivePipeline,
    store: BackupStore,
    bucket: String,
    max_backups: usize,
    local_copy: Option<LocalCopyPolicy>,
}

impl RemoteTarget {
    pub fn new(
        pipeline: ArchivePipeline,
        storage: Arc<dyn Storage>,
        bucket: &str,
        backup_dir: &str,
        extension: &str,
        max_backups: usize,
    ) -> Result<Self> {
        Ok(Self {
            pipeline,
            store: BackupStore::new(storage, backup_dir, extension, KeyLayout::Grouped)?,
            bucket: bucket.to_string(),
            max_backups,
            local_copy: None,
        })
    }

    pub fn with_local_copy(mut self, policy: LocalCopyPolicy) -> Self {
        self.local_copy = Some(policy);
        self
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }
}

#[async_trait]
impl BackupTarget for RemoteTarget {
    fn label(&self) -> &'static str {
        "remote"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn backup(
        &self,
        dirs: &[PathBuf],
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<PushResult>> {
        let now = Utc::now();
        let key = self.store.key_for(name, now)?;
        let mut request = PushRequest::new(&self.bucket, key, dirs.to_vec());

        if let Some(policy) = &self.local_copy {
            let file_name = KeyLayout::Flat.relative_key(name, self.store.extension(), now);
            let mut copy = LocalCopy::new(policy.directory.join(file_name));
            if let Some(predicate) = policy.should_backup.clone() {
                copy = copy.with_predicate(move || predicate());
            }
            request = request.with_local_copy(copy);
        }

        self.pipeline.push(request, cancel).await.map(Some)
    }

    async fn data_retention(&self, manifest: &Manifest) -> Result<Vec<String>> {
        Retention::new(
            self.store.clone(),
            RetentionPolicy::Cap,
            self.max_backups,
            self.pipeline.events().clone(),
        )?
        .apply(manifest)
        .await
    }

    async fn backup_files(&self) -> Result<Vec<BackupFile>> {
        self.store.backup_files().await
    }
}

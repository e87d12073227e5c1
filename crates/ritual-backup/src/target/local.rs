//! Local target: flat keys, at most one backup per calendar month.

use super::{BackupFile, BackupStore, BackupTarget, KeyLayout};
use crate::archive::{ArchivePipeline, PushRequest, PushResult};
use crate::retention::{Retention, RetentionPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use ritual_core::{Manifest, Result, Storage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct LocalTarget {
    pipeline: ArchivePipeline,
    store: BackupStore,
    bucket: String,
    max_backups: usize,
}

impl LocalTarget {
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
            store: BackupStore::new(storage, backup_dir, extension, KeyLayout::Flat)?,
            bucket: bucket.to_string(),
            max_backups,
        })
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }

    /// True when the newest valid backup was taken in the current UTC month.
    pub async fn is_throttled(&self) -> Result<bool> {
        self.throttled_at(Utc::now()).await
    }

    /// Key under which a file named like `path` is tracked by this target.
    pub fn key_for_copy(&self, path: &Path) -> Option<String> {
        let file_name = path.file_name()?.to_str()?;
        Some(format!("{}/{}", self.store.backup_dir(), file_name))
    }

    async fn throttled_at(&self, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .store
            .newest()
            .await?
            .is_some_and(|newest| same_month(newest.timestamp, now)))
    }
}

fn same_month(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

#[async_trait]
impl BackupTarget for LocalTarget {
    fn label(&self) -> &'static str {
        "local"
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

        if self.throttled_at(now).await? {
            info!(
                "Skipping local backup of {}: one already exists for {}",
                name,
                now.format("%Y-%m")
            );
            return Ok(None);
        }

        let request = PushRequest::new(&self.bucket, key, dirs.to_vec());
        self.pipeline.push(request, cancel).await.map(Some)
    }

    async fn data_retention(&self, manifest: &Manifest) -> Result<Vec<String>> {
        Retention::new(
            self.store.clone(),
            RetentionPolicy::ManifestAware,
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_same_month() {
        let a = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 5, 31, 23, 59, 59).unwrap();
        let c = Utc.with_ymd_and_hms(2023, 5, 15, 0, 0, 0).unwrap();
        assert!(same_month(a, b));
        assert!(!same_month(a, c));
    }
}

//! Retention: prune stored backups against a cap and the manifest.
//!
//! Deletions are planned first from the newest-first listing, then executed
//! in a single sweep that stops at the first failure.

use crate::target::{BackupFile, BackupStore};
use ritual_core::{Error, Event, EventSink, Manifest, Result};
use std::sync::Arc;
use tracing::{debug, info};

const OPERATION: &str = "retention";

/// Which files a retention pass considers for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep the newest `cap` files
    Cap,
    /// Delete files missing from the manifest, then keep the newest `cap` of the rest
    ManifestAware,
}

/// Retention over one backup store.
pub struct Retention {
    store: BackupStore,
    policy: RetentionPolicy,
    cap: usize,
    events: Arc<dyn EventSink>,
}

impl Retention {
    pub fn new(
        store: BackupStore,
        policy: RetentionPolicy,
        cap: usize,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        if cap == 0 {
            return Err(Error::validation("retention cap must be at least 1"));
        }
        Ok(Self {
            store,
            policy,
            cap,
            events,
        })
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Prunes the store and returns the deleted keys in deletion order.
    pub async fn apply(&self, manifest: &Manifest) -> Result<Vec<String>> {
        let files = self.store.backup_files().await?;
        let doomed = plan(&files, manifest, self.policy, self.cap)?;

        if doomed.is_empty() {
            debug!(
                "Retention: {} backups under {}, nothing to delete",
                files.len(),
                self.store.backup_dir()
            );
            return Ok(doomed);
        }

        for key in &doomed {
            self.events
                .emit(Event::prompt(OPERATION, format!("Deleting backup {}", key)));
            self.store.delete(key).await?;
        }

        info!(
            "Retention removed {} of {} backups under {}",
            doomed.len(),
            files.len(),
            self.store.backup_dir()
        );
        Ok(doomed)
    }
}

/// Keys to delete from a newest-first listing.
pub fn plan(
    files: &[BackupFile],
    manifest: &Manifest,
    policy: RetentionPolicy,
    cap: usize,
) -> Result<Vec<String>> {
    match policy {
        RetentionPolicy::Cap => {
            let doomed = over_cap(files.iter(), cap);
            let expected = files.len().saturating_sub(cap);
            if doomed.len() != expected {
                return Err(Error::consistency(format!(
                    "planned {} deletions for {} backups with cap {}",
                    doomed.len(),
                    files.len(),
                    cap
                )));
            }
            Ok(doomed)
        }
        RetentionPolicy::ManifestAware => {
            let (kept, dangling): (Vec<&BackupFile>, Vec<&BackupFile>) =
                files.iter().partition(|f| manifest.contains_uri(&f.key));

            for file in &dangling {
                debug!("Dangling backup not in manifest: {}", file.key);
            }

            let mut doomed: Vec<String> = dangling.into_iter().map(|f| f.key.clone()).collect();
            doomed.extend(over_cap(kept.into_iter(), cap));
            Ok(doomed)
        }
    }
}

fn over_cap<'a>(files: impl Iterator<Item = &'a BackupFile>, cap: usize) -> Vec<String> {
    files.skip(cap).map(|f| f.key.clone()).collect()
}

//! Pull: download an archive and extract it entry by entry.

use super::{ArchivePipeline, ConflictAction, ConflictStrategy};
use flate2::read::GzDecoder;
use ritual_core::storage::confine;
use ritual_core::{Error, Event, Result};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tar::{Archive, Entry, EntryType};
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Accepts or rejects an archive entry by its path inside the archive.
pub type EntryFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Input of a pull.
#[derive(Clone)]
pub struct PullRequest {
    pub bucket: String,
    pub key: String,
    pub destination: PathBuf,
    pub conflict: ConflictStrategy,
    /// `None` accepts every entry
    pub filter: Option<EntryFilter>,
}

impl PullRequest {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            destination: destination.into(),
            conflict: ConflictStrategy::default(),
            filter: None,
        }
    }

    pub fn with_conflict(mut self, conflict: ConflictStrategy) -> Self {
        self.conflict = conflict;
        self
    }

    pub fn with_filter(mut self, filter: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(Error::validation("pull requires a bucket"));
        }
        if self.key.trim().is_empty() {
            return Err(Error::validation("pull requires a key"));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(Error::validation("pull requires a destination directory"));
        }
        Ok(())
    }
}

/// What a pull did to the destination tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullResult {
    /// Files written
    pub restored: Vec<PathBuf>,
    /// Existing files left untouched by [`ConflictStrategy::Skip`]
    pub skipped: Vec<PathBuf>,
    /// `.bak` copies made by [`ConflictStrategy::Backup`]
    pub backed_up: Vec<PathBuf>,
    /// Directory entries created or merged
    pub directories: usize,
}

impl ArchivePipeline {
    /// Downloads `request.key` and extracts it below `request.destination`.
    ///
    /// A cancelled or failed pull may leave the destination partially
    /// populated; only files being written at the moment of failure are
    /// removed.
    pub async fn pull(&self, request: PullRequest, cancel: &CancellationToken) -> Result<PullResult> {
        request.validate()?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let operation = format!("pull {}", request.key);
        self.events.emit(Event::start(
            &operation,
            format!(
                "Restoring {}/{} into {}",
                request.bucket,
                request.key,
                request.destination.display()
            ),
        ));

        let result = self.run_pull(request, cancel).await;
        match &result {
            Ok(pulled) => self.events.emit(Event::finish(
                &operation,
                format!(
                    "Restored {} files ({} skipped, {} backed up)",
                    pulled.restored.len(),
                    pulled.skipped.len(),
                    pulled.backed_up.len()
                ),
            )),
            Err(e) => self.events.emit(Event::error(&operation, e.to_string())),
        }
        result
    }

    async fn run_pull(&self, request: PullRequest, cancel: &CancellationToken) -> Result<PullResult> {
        let reader = tokio::select! {
            res = self.transport.download(&request.bucket, &request.key) => res?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        tokio::fs::create_dir_all(&request.destination)
            .await
            .map_err(|e| Error::io(format!("creating {}", request.destination.display()), e))?;

        // the bridge must be built inside the runtime it reads from
        let bridge = SyncIoBridge::new(reader);
        let cancel = cancel.clone();
        let key = request.key.clone();
        let result = tokio::task::spawn_blocking(move || extract(bridge, &request, &cancel))
            .await
            .map_err(|e| Error::consistency(format!("archive extraction failed: {}", e)))??;

        info!(
            "Pulled {}: {} restored, {} skipped, {} backed up",
            key,
            result.restored.len(),
            result.skipped.len(),
            result.backed_up.len()
        );
        Ok(result)
    }
}

/// Extracts a gzip-compressed tar stream, strictly in archive order.
pub(crate) fn extract<R: Read>(
    reader: R,
    request: &PullRequest,
    cancel: &CancellationToken,
) -> Result<PullResult> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut result = PullResult::default();
    let read_error = |e: io::Error| Error::io(format!("reading archive {}", request.key), e);

    for entry in archive.entries().map_err(read_error)? {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut entry = entry.map_err(read_error)?;
        let entry_path = entry.path().map_err(read_error)?.into_owned();

        if let Some(filter) = &request.filter {
            if !filter(&entry_path) {
                debug!("Filtered out {}", entry_path.display());
                continue;
            }
        }

        if names_root(&entry_path) {
            continue;
        }
        let target = confine(&request.destination, &entry_path)?;

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target)
                    .map_err(|e| Error::io(format!("creating {}", target.display()), e))?;
                result.directories += 1;
            }
            kind if kind.is_file() => {
                restore_file(&mut entry, &target, request.conflict, &mut result)?;
            }
            kind => debug!("Skipping {:?} entry {}", kind, entry_path.display()),
        }
    }

    Ok(result)
}

/// True for `.`-only entries, which refer to the destination itself.
fn names_root(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::CurDir))
        && !path.as_os_str().is_empty()
}

fn restore_file<R: Read>(
    entry: &mut Entry<'_, R>,
    target: &Path,
    conflict: ConflictStrategy,
    result: &mut PullResult,
) -> Result<()> {
    if target.symlink_metadata().is_ok() {
        match conflict.resolve(target)? {
            ConflictAction::Skip => {
                result.skipped.push(target.to_path_buf());
                return Ok(());
            }
            ConflictAction::BackedUp(backup) => result.backed_up.push(backup),
            ConflictAction::Write => {}
        }
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
    }

    if let Err(e) = write_entry(entry, target) {
        let _ = fs::remove_file(target);
        return Err(e);
    }

    result.restored.push(target.to_path_buf());
    Ok(())
}

fn write_entry<R: Read>(entry: &mut Entry<'_, R>, target: &Path) -> Result<()> {
    let context = || format!("writing {}", target.display());
    let mut file = File::create(target).map_err(|e| Error::io(context(), e))?;
    io::copy(entry, &mut file).map_err(|e| Error::io(context(), e))?;
    file.sync_all().map_err(|e| Error::io(context(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(mode) = entry.header().mode() {
            fs::set_permissions(target, fs::Permissions::from_mode(mode & 0o7777))
                .map_err(|e| Error::io(context(), e))?;
        }
    }

    Ok(())
}

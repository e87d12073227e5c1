//! Push: archive directory trees and upload them in a single streaming pass.
//!
//! Two workers run per push. The producer (a blocking task) walks the source
//! directories and writes tar entries through gzip and a hashing writer into
//! a bounded channel. The consumer turns the channel into an `AsyncRead`,
//! optionally tees every chunk into a local file, and hands it to the
//! transport. The bounded channel keeps memory use constant: the producer
//! blocks whenever the uploader falls behind.

use super::ArchivePipeline;
use crate::compression::{archive_compression, ChannelWriter, Chunk, HashingWriter};
use bytes::Bytes;
use flate2::write::GzEncoder;
use futures::stream::{self, Stream};
use ritual_core::{Error, Event, Result};
use std::any::Any;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tar::Builder as TarBuilder;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Decides whether a local copy should be kept for a push.
pub type BackupPredicate = Box<dyn Fn() -> bool + Send + Sync>;

/// Where to keep a local copy of the pushed archive.
pub struct LocalCopy {
    pub path: PathBuf,
    /// Evaluated once before streaming starts; `None` means always keep
    pub should_backup: Option<BackupPredicate>,
}

impl LocalCopy {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            should_backup: None,
        }
    }

    pub fn with_predicate(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.should_backup = Some(Box::new(predicate));
        self
    }
}

/// Input of a push.
pub struct PushRequest {
    pub bucket: String,
    pub key: String,
    /// Each directory becomes a top-level entry named after its base name
    pub directories: Vec<PathBuf>,
    pub local_copy: Option<LocalCopy>,
}

impl PushRequest {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, directories: Vec<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            directories,
            local_copy: None,
        }
    }

    pub fn with_local_copy(mut self, local_copy: LocalCopy) -> Self {
        self.local_copy = Some(local_copy);
        self
    }

    async fn validate(&self) -> Result<Vec<SourceDir>> {
        if self.bucket.trim().is_empty() {
            return Err(Error::validation("push requires a bucket"));
        }
        if self.key.trim().is_empty() {
            return Err(Error::validation("push requires a key"));
        }
        if self.directories.is_empty() {
            return Err(Error::validation("push requires at least one directory"));
        }

        let mut sources = Vec::with_capacity(self.directories.len());
        for dir in &self.directories {
            let invalid = |reason: String| {
                Error::validation(format!("cannot archive {}: {}", dir.display(), reason))
            };
            let canonical = fs::canonicalize(dir)
                .await
                .map_err(|e| invalid(e.to_string()))?;
            let metadata = fs::metadata(&canonical)
                .await
                .map_err(|e| invalid(e.to_string()))?;
            if !metadata.is_dir() {
                return Err(invalid("not a directory".to_string()));
            }
            let name = canonical
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| invalid("no base name".to_string()))?;
            sources.push(SourceDir {
                path: dir.clone(),
                name,
            });
        }
        Ok(sources)
    }
}

/// Outcome of a successful push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResult {
    /// Bytes of the compressed stream
    pub size: u64,
    /// Hex SHA-256 of the compressed stream
    pub checksum: String,
    pub key: String,
    /// Set only when the local copy was written completely
    pub local_path: Option<PathBuf>,
}

struct SourceDir {
    path: PathBuf,
    name: String,
}

impl ArchivePipeline {
    /// Archives `request.directories` and uploads the stream to `request.key`.
    pub async fn push(&self, request: PushRequest, cancel: &CancellationToken) -> Result<PushResult> {
        let sources = request.validate().await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let operation = format!("push {}", request.key);
        self.events.emit(Event::start(
            &operation,
            format!(
                "Archiving {} directories to {}/{}",
                sources.len(),
                request.bucket,
                request.key
            ),
        ));

        let result = self.run_push(request, sources, cancel).await;
        match &result {
            Ok(pushed) => self.events.emit(Event::finish(
                &operation,
                format!("Uploaded {} bytes (sha256 {})", pushed.size, pushed.checksum),
            )),
            Err(e) => self.events.emit(Event::error(&operation, e.to_string())),
        }
        result
    }

    async fn run_push(
        &self,
        request: PushRequest,
        sources: Vec<SourceDir>,
        cancel: &CancellationToken,
    ) -> Result<PushResult> {
        let PushRequest {
            bucket,
            key,
            local_copy,
            ..
        } = request;

        // decided once, before any bytes flow
        let local_path = local_copy.and_then(|copy| {
            let keep = copy.should_backup.as_ref().map_or(true, |predicate| predicate());
            if !keep {
                debug!("Local copy declined for {}", key);
            }
            keep.then_some(copy.path)
        });

        let tee = match &local_path {
            Some(path) => Some(open_tee(path).await?),
            None => None,
        };
        let tee_done = Arc::new(AtomicBool::new(false));

        let (tx, rx) = mpsc::channel::<Chunk>(self.settings.buffer_chunks);
        let chunk_size = self.settings.chunk_size;
        let producer_cancel = cancel.clone();
        let producer = tokio::task::spawn_blocking(move || {
            run_producer(sources, tx, chunk_size, producer_cancel)
        });

        let reader = StreamReader::new(Box::pin(consumer_stream(ConsumerState {
            rx,
            tee,
            tee_done: tee_done.clone(),
        })));

        let uploaded = tokio::select! {
            res = self.transport.upload(&bucket, &key, Box::new(reader), -1) => res,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };
        let produced = producer.await.unwrap_or_else(|e| {
            Err(Error::consistency(format!("archive producer failed: {}", e)))
        });

        let outcome = match (produced, uploaded) {
            (Ok((size, checksum)), Ok(written)) if written == size => Ok((size, checksum)),
            (Ok((size, _)), Ok(written)) => Err(Error::consistency(format!(
                "uploaded {} bytes for {} but produced {}",
                written, key, size
            ))),
            (Ok(_), Err(upload_err)) => Err(upload_err),
            (Err(producer_err), Ok(_)) => Err(producer_err),
            // a closed pipe on the producer side only echoes the consumer failure
            (Err(producer_err), Err(upload_err)) if is_closed_pipe(&producer_err) => Err(upload_err),
            (Err(producer_err), Err(_)) => Err(producer_err),
        };

        match outcome {
            Ok((size, checksum)) => {
                let local_path = match local_path {
                    Some(path) if tee_done.load(Ordering::SeqCst) => Some(path),
                    Some(path) => {
                        warn!("Local copy of {} is incomplete, removing {}", key, path.display());
                        remove_partial(&path).await;
                        None
                    }
                    None => None,
                };

                info!("Pushed {} ({} bytes, sha256 {})", key, size, checksum);
                Ok(PushResult {
                    size,
                    checksum,
                    key,
                    local_path,
                })
            }
            Err(e) => {
                if let Some(path) = &local_path {
                    remove_partial(path).await;
                }
                Err(e)
            }
        }
    }
}

struct ConsumerState {
    rx: mpsc::Receiver<Chunk>,
    tee: Option<File>,
    tee_done: Arc<AtomicBool>,
}

/// Turns the handoff channel into a byte stream, teeing into the local copy.
fn consumer_stream(state: ConsumerState) -> impl Stream<Item = io::Result<Bytes>> + Send {
    stream::unfold(state, |mut state| async move {
        match state.rx.recv().await {
            Some(Ok(chunk)) => {
                if let Some(tee) = state.tee.as_mut() {
                    if let Err(e) = tee.write_all(&chunk).await {
                        state.tee = None;
                        return Some((Err(e), state));
                    }
                }
                Some((Ok(chunk), state))
            }
            Some(Err(e)) => {
                state.tee = None;
                Some((Err(e), state))
            }
            None => {
                let mut tee = state.tee.take()?;
                let finished = async {
                    tee.flush().await?;
                    tee.sync_all().await
                }
                .await;
                match finished {
                    Ok(()) => {
                        state.tee_done.store(true, Ordering::SeqCst);
                        None
                    }
                    Err(e) => Some((Err(e), state)),
                }
            }
        }
    })
}

/// Producer entry point; runs on a blocking thread.
fn run_producer(
    sources: Vec<SourceDir>,
    tx: mpsc::Sender<Chunk>,
    chunk_size: usize,
    cancel: CancellationToken,
) -> Result<(u64, String)> {
    let abort_tx = tx.clone();
    let writer = ChannelWriter::new(tx, chunk_size);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| write_archive(&sources, writer, &cancel)))
        .unwrap_or_else(|payload| {
            Err(Error::consistency(format!(
                "archive producer panicked: {}",
                panic_message(payload.as_ref())
            )))
        });

    if let Err(e) = &outcome {
        // the writer chain is gone by now, so the error is the last item the consumer sees
        let _ = abort_tx.blocking_send(Err(io::Error::other(e.to_string())));
    }
    outcome
}

fn write_archive(
    sources: &[SourceDir],
    writer: ChannelWriter,
    cancel: &CancellationToken,
) -> Result<(u64, String)> {
    let encoder = GzEncoder::new(HashingWriter::new(writer), archive_compression());
    let mut tar = TarBuilder::new(encoder);
    tar.follow_symlinks(false);

    let mut entries = 0usize;
    for source in sources {
        entries += append_directory(&mut tar, source, cancel)?;
    }

    // close order: tar end-of-archive marker, gzip trailer, then the channel
    let encoder = tar
        .into_inner()
        .map_err(|e| Error::io("finishing tar stream", e))?;
    let hashing = encoder
        .finish()
        .map_err(|e| Error::io("finishing gzip stream", e))?;
    let (writer, size, checksum) = hashing
        .finish()
        .map_err(|e| Error::io("flushing archive stream", e))?;
    writer
        .close()
        .map_err(|e| Error::io("closing archive stream", e))?;

    debug!("Archived {} entries into {} bytes", entries, size);
    Ok((size, checksum))
}

/// Appends one source directory in walk order; returns the number of entries written.
fn append_directory<W: Write>(
    tar: &mut TarBuilder<W>,
    source: &SourceDir,
    cancel: &CancellationToken,
) -> Result<usize> {
    let mut count = 0;

    for entry in WalkDir::new(&source.path)
        .follow_links(false)
        .sort_by_file_name()
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let entry = entry
            .map_err(|e| Error::io(format!("walking {}", source.path.display()), e.into()))?;
        let relative = entry.path().strip_prefix(&source.path).map_err(|_| {
            Error::consistency(format!(
                "{} is not below {}",
                entry.path().display(),
                source.path.display()
            ))
        })?;
        let name = if relative.as_os_str().is_empty() {
            PathBuf::from(&source.name)
        } else {
            Path::new(&source.name).join(relative)
        };

        let file_type = entry.file_type();
        let appended = if file_type.is_dir() {
            tar.append_dir(&name, entry.path())
        } else if file_type.is_file() {
            tar.append_path_with_name(entry.path(), &name)
        } else {
            debug!("Skipping non-regular file: {}", entry.path().display());
            continue;
        };
        appended.map_err(|e| Error::io(format!("archiving {}", entry.path().display()), e))?;
        count += 1;
    }

    Ok(count)
}

async fn open_tee(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
    }
    File::create(path)
        .await
        .map_err(|e| Error::io(format!("creating local copy {}", path.display()), e))
}

async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial local copy {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial local copy {}: {}", path.display(), e),
    }
}

fn is_closed_pipe(err: &Error) -> bool {
    matches!(err, Error::Io { source, .. } if source.kind() == io::ErrorKind::BrokenPipe)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::PipelineSettings;
    use async_trait::async_trait;
    use ritual_core::events::NoopSink;
    use ritual_core::{BoxReader, FsTransport, Transport};
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn pipeline(transport: Arc<dyn Transport>) -> ArchivePipeline {
        ArchivePipeline::new(transport, Arc::new(NoopSink))
    }

    fn world_dir(base: &Path) -> PathBuf {
        let world = base.join("world");
        std::fs::create_dir_all(world.join("region")).unwrap();
        std::fs::write(world.join("level.dat"), b"level").unwrap();
        std::fs::write(world.join("region/r.0.0.mca"), vec![3u8; 10_000]).unwrap();
        world
    }

    /// Reads some of the stream, then fails.
    struct FailingTransport;

    #[async_trait]
    impl Transport for FailingTransport {
        async fn upload(&self, _: &str, key: &str, mut reader: BoxReader, _: i64) -> Result<u64> {
            let mut buf = [0u8; 16];
            let _ = reader.read(&mut buf).await;
            Err(Error::transport("upload", key, "simulated network failure"))
        }

        async fn download(&self, _: &str, key: &str) -> Result<BoxReader> {
            Err(Error::not_found(key))
        }
    }

    /// Cancels the push after the first read, then stalls.
    struct CancellingTransport {
        cancel: CancellationToken,
    }

    #[async_trait]
    impl Transport for CancellingTransport {
        async fn upload(&self, _: &str, key: &str, mut reader: BoxReader, _: i64) -> Result<u64> {
            let mut buf = [0u8; 64];
            reader
                .read(&mut buf)
                .await
                .map_err(|e| Error::transport("upload", key, e))?;
            self.cancel.cancel();
            futures::future::pending::<()>().await;
            Ok(0)
        }

        async fn download(&self, _: &str, key: &str) -> Result<BoxReader> {
            Err(Error::not_found(key))
        }
    }

    /// Removes `victim` from the source tree after the first read, then drains the stream.
    struct DeletingTransport {
        victim: PathBuf,
    }

    #[async_trait]
    impl Transport for DeletingTransport {
        async fn upload(&self, _: &str, key: &str, mut reader: BoxReader, _: i64) -> Result<u64> {
            let mut buf = [0u8; 512];
            let first = reader
                .read(&mut buf)
                .await
                .map_err(|e| Error::transport("upload", key, e))?;
            std::fs::remove_file(&self.victim).unwrap();

            let mut rest = Vec::new();
            reader
                .read_to_end(&mut rest)
                .await
                .map_err(|e| Error::transport("upload", key, e))?;
            Ok((first + rest.len()) as u64)
        }

        async fn download(&self, _: &str, key: &str) -> Result<BoxReader> {
            Err(Error::not_found(key))
        }
    }

    /// Incompressible bytes, so the compressed stream stays as large as the input.
    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_4f6c_dd1du64;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect()
    }

    #[tokio::test]
    async fn test_cancel_during_upload() {
        let temp_dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let pipeline = pipeline(Arc::new(CancellingTransport {
            cancel: cancel.clone(),
        }));
        let world = world_dir(temp_dir.path());
        std::fs::write(world.join("region/r.1.0.mca"), noise(512 * 1024)).unwrap();
        let local = temp_dir.path().join("local/copy.tar.gz");

        let err = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            pipeline.push(
                PushRequest::new("bucket", "a.tar.gz", vec![world])
                    .with_local_copy(LocalCopy::new(&local)),
                &cancel,
            ),
        )
        .await
        .expect("cancelled push must return")
        .unwrap_err();

        assert!(matches!(err, Error::Cancelled), "got {:?}", err);
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn test_producer_failure_wins_over_upload_failure() {
        let temp_dir = TempDir::new().unwrap();
        let world = temp_dir.path().join("world");
        std::fs::create_dir_all(&world).unwrap();
        std::fs::write(world.join("a_region.mca"), noise(1024 * 1024)).unwrap();
        std::fs::write(world.join("z_level.dat"), b"level").unwrap();

        let pipeline = ArchivePipeline::new(
            Arc::new(DeletingTransport {
                victim: world.join("z_level.dat"),
            }),
            Arc::new(NoopSink),
        )
        .with_settings(PipelineSettings {
            chunk_size: 1024,
            buffer_chunks: 1,
        });
        let local = temp_dir.path().join("local/copy.tar.gz");

        let err = pipeline
            .push(
                PushRequest::new("bucket", "a.tar.gz", vec![world])
                    .with_local_copy(LocalCopy::new(&local)),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Io { .. }), "got {:?}", err);
        assert!(!is_closed_pipe(&err));
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn test_validation_before_io() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = pipeline(Arc::new(FsTransport::new(temp_dir.path())));
        let cancel = CancellationToken::new();
        let world = world_dir(temp_dir.path());
        let not_a_dir = temp_dir.path().join("level.dat");
        std::fs::write(&not_a_dir, b"level").unwrap();

        for request in [
            PushRequest::new("", "k.tar.gz", vec![world.clone()]),
            PushRequest::new("b", "", vec![world.clone()]),
            PushRequest::new("b", "k.tar.gz", vec![]),
            PushRequest::new("b", "k.tar.gz", vec![temp_dir.path().join("missing")]),
            PushRequest::new("b", "k.tar.gz", vec![not_a_dir.clone()]),
        ] {
            let err = pipeline.push(request, &cancel).await.unwrap_err();
            assert!(matches!(err, Error::Validation { .. }), "got {:?}", err);
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = pipeline(Arc::new(FsTransport::new(temp_dir.path().join("store"))));
        let world = world_dir(temp_dir.path());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline
            .push(PushRequest::new("b", "k.tar.gz", vec![world]), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!temp_dir.path().join("store").exists());
    }

    #[tokio::test]
    async fn test_push_with_local_copy() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = pipeline(Arc::new(FsTransport::new(temp_dir.path().join("store"))));
        let world = world_dir(temp_dir.path());
        let local = temp_dir.path().join("local/copy.tar.gz");

        let result = pipeline
            .push(
                PushRequest::new("bucket", "worlds/a.tar.gz", vec![world])
                    .with_local_copy(LocalCopy::new(&local)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.local_path.as_deref(), Some(local.as_path()));
        let uploaded = std::fs::read(temp_dir.path().join("store/bucket/worlds/a.tar.gz")).unwrap();
        let copied = std::fs::read(&local).unwrap();
        assert_eq!(uploaded, copied);
        assert_eq!(result.size, uploaded.len() as u64);
        assert_eq!(result.checksum.len(), 64);
    }

    #[tokio::test]
    async fn test_predicate_evaluated_once() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = pipeline(Arc::new(FsTransport::new(temp_dir.path().join("store"))));
        let world = world_dir(temp_dir.path());
        let local = temp_dir.path().join("local/copy.tar.gz");

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = pipeline
            .push(
                PushRequest::new("bucket", "a.tar.gz", vec![world]).with_local_copy(
                    LocalCopy::new(&local).with_predicate(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        false
                    }),
                ),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.local_path.is_none());
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn test_upload_failure_removes_local_copy() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = pipeline(Arc::new(FailingTransport));
        let world = world_dir(temp_dir.path());
        let local = temp_dir.path().join("local/copy.tar.gz");

        let err = pipeline
            .push(
                PushRequest::new("bucket", "a.tar.gz", vec![world])
                    .with_local_copy(LocalCopy::new(&local)),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport { .. }), "got {:?}", err);
        assert!(!local.exists());
    }

    #[test]
    fn test_closed_pipe_detection() {
        let closed = Error::io("archiving", io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        assert!(is_closed_pipe(&closed));
        assert!(!is_closed_pipe(&Error::Cancelled));
    }
}

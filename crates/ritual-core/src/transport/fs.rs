//! Filesystem transport: buckets are directories beneath a root

use super::{BoxReader, ProgressReader, Transport, DEFAULT_PROGRESS_INTERVAL};
use crate::error::{Error, Result};
use crate::events::{EventSink, NoopSink};
use crate::storage::{confine, normalize_key};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Transport writing objects to `<root>/<bucket>/<key>`.
#[derive(Clone)]
pub struct FsTransport {
    root: PathBuf,
    events: Arc<dyn EventSink>,
    interval: Duration,
}

impl FsTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            events: Arc::new(NoopSink),
            interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Sets where progress events go.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Filesystem path of `bucket/key`.
    pub fn path_for(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let bucket = normalize_key(bucket);
        let key = normalize_key(key);
        if bucket.is_empty() || key.is_empty() {
            return Err(Error::validation("bucket and key must not be empty"));
        }
        confine(&self.root, &Path::new(&bucket).join(&key))
    }
}

#[async_trait]
impl Transport for FsTransport {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        reader: BoxReader,
        size_hint: i64,
    ) -> Result<u64> {
        let path = self.path_for(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::transport("upload", key, e))?;
        }

        let staging = StagingFile::for_target(&path);

        let mut reader = ProgressReader::new(
            reader,
            format!("upload {}", key),
            self.events.clone(),
            size_hint,
            self.interval,
        );

        let written = async {
            let mut file = File::create(staging.path()).await?;
            let written = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(staging.path(), &path).await?;
            Ok::<_, std::io::Error>(written)
        }
        .await
        .map_err(|e| Error::transport("upload", key, e))?;

        staging.persisted();
        debug!("Uploaded {} bytes to {}", written, path.display());
        Ok(written)
    }

    async fn download(&self, bucket: &str, key: &str) -> Result<BoxReader> {
        let path = self.path_for(bucket, key)?;
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::not_found(key)),
            Err(e) => return Err(Error::transport("download", key, e)),
        };
        let size = file
            .metadata()
            .await
            .map_err(|e| Error::transport("download", key, e))?
            .len();

        Ok(Box::new(ProgressReader::new(
            file,
            format!("download {}", key),
            self.events.clone(),
            size as i64,
            self.interval,
        )))
    }
}

/// Upload staging file, removed on drop unless the upload completed.
///
/// Covers uploads abandoned mid-stream, where the future is dropped and no
/// error path runs.
struct StagingFile {
    path: PathBuf,
    persisted: bool,
}

impl StagingFile {
    fn for_target(target: &Path) -> Self {
        let mut path = target.as_os_str().to_owned();
        path.push(".partial");
        Self {
            path: PathBuf::from(path),
            persisted: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Marks the staging file as renamed into place.
    fn persisted(mut self) {
        self.persisted = true;
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed upload staging file {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;
    use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

    struct ResetReader;

    impl AsyncRead for ResetReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
            _: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::new(
                ErrorKind::ConnectionReset,
                "stream reset",
            )))
        }
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let temp_dir = TempDir::new().unwrap();
        let transport = FsTransport::new(temp_dir.path());

        let payload = b"archive bytes".to_vec();
        let written = transport
            .upload("bucket", "worlds/a.tar.gz", Box::new(std::io::Cursor::new(payload.clone())), -1)
            .await
            .unwrap();
        assert_eq!(written, payload.len() as u64);
        assert!(temp_dir.path().join("bucket/worlds/a.tar.gz").exists());

        let mut reader = transport.download("bucket", "worlds/a.tar.gz").await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, payload);
    }

    #[tokio::test]
    async fn test_abandoned_upload_leaves_no_staging_file() {
        let temp_dir = TempDir::new().unwrap();
        let transport = FsTransport::new(temp_dir.path());
        let (mut writer, stalled) = tokio::io::duplex(64);
        writer.write_all(b"first bytes").await.unwrap();

        let upload = transport.upload("bucket", "worlds/a.tar.gz", Box::new(stalled), -1);
        let abandoned = tokio::time::timeout(Duration::from_millis(100), upload).await;
        assert!(abandoned.is_err());

        let dir = temp_dir.path().join("bucket/worlds");
        assert!(std::fs::read_dir(&dir).unwrap().next().is_none());
        drop(writer);
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_no_staging_file() {
        let temp_dir = TempDir::new().unwrap();
        let transport = FsTransport::new(temp_dir.path());
        let err = transport
            .upload("bucket", "worlds/a.tar.gz", Box::new(ResetReader), -1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { operation: "upload", .. }));

        let dir = temp_dir.path().join("bucket/worlds");
        assert!(std::fs::read_dir(&dir).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_download_missing() {
        let temp_dir = TempDir::new().unwrap();
        let transport = FsTransport::new(temp_dir.path());
        let err = transport.download("bucket", "missing.tar.gz").await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rejects_escaping_key() {
        let temp_dir = TempDir::new().unwrap();
        let transport = FsTransport::new(temp_dir.path().join("root"));
        let err = transport
            .upload("bucket", "../../escape", Box::new(std::io::Cursor::new(vec![1u8])), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PathTraversal { .. }));
    }
}

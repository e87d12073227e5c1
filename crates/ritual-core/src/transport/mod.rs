//! Streaming transport port.
//!
//! [`Transport`] moves whole objects as byte streams. Adapters report
//! progress through [`ProgressReader`], which emits an update at a fixed
//! interval with the cumulative byte count and, when the total size is
//! known, a percentage held below 100 until the stream ends.

mod fs;
mod progress;
#[cfg(feature = "s3")]
mod s3;

pub use fs::FsTransport;
pub use progress::{ProgressReader, DEFAULT_PROGRESS_INTERVAL};
#[cfg(feature = "s3")]
pub use s3::S3Transport;

use crate::error::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Owned, sendable byte stream.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Streaming upload/download of objects.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Streams `reader` into `bucket/key` and returns the number of bytes written.
    ///
    /// `size_hint` is the expected total size, or a non-positive value when unknown.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        reader: BoxReader,
        size_hint: i64,
    ) -> Result<u64>;

    /// Opens `bucket/key` for streaming reads.
    async fn download(&self, bucket: &str, key: &str) -> Result<BoxReader>;
}

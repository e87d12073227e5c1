//! Ritual backup engine
//!
//! This crate archives world directories into object storage and restores
//! them, and keeps the stored backups in check.
//!
//! # Features
//!
//! - **Streaming push**: tar+gzip produced and uploaded concurrently over a
//!   bounded buffer, with a SHA256 checksum of the exact uploaded bytes
//! - **Safe pull**: sequential extraction with path confinement and
//!   replace/skip/backup/fail conflict strategies
//! - **Backup targets**: a monthly-throttled local target and an unthrottled
//!   remote target with optional local copies
//! - **Retention**: cap-based pruning, plus dangling-file cleanup against the
//!   manifest for local backups
//!
//! # Examples
//!
//! ```no_run
//! use ritual_backup::{ArchivePipeline, PushRequest};
//! use ritual_core::{FsTransport, TracingSink};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = ArchivePipeline::new(
//!         Arc::new(FsTransport::new("/var/lib/ritual/remote")),
//!         Arc::new(TracingSink),
//!     );
//!
//!     let request = PushRequest::new(
//!         "ritual",
//!         "worlds/survival/20240101000000.tar.gz",
//!         vec![PathBuf::from("/srv/minecraft/world")],
//!     );
//!     let result = pipeline.push(request, &CancellationToken::new()).await?;
//!
//!     println!("Pushed {} bytes (sha256 {})", result.size, result.checksum);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod compression;
pub mod manifest_store;
pub mod retention;
pub mod target;

// Re-export commonly used types
pub use archive::{
    ArchivePipeline, ConflictStrategy, EntryFilter, LocalCopy, PipelineSettings, PullRequest,
    PullResult, PushRequest, PushResult,
};
pub use compression::{HashingWriter, COMPRESSION_LEVEL};
pub use manifest_store::{fetch_manifest, save_manifest};
pub use retention::{Retention, RetentionPolicy};
pub use target::{
    BackupFile, BackupStore, BackupTarget, KeyLayout, LocalCopyPolicy, LocalTarget, RemoteTarget,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_compression_level() {
        assert_eq!(COMPRESSION_LEVEL, 1);
    }
}

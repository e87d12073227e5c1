//! # ritual-core
//!
//! Core library for ritual providing:
//! - Configuration file parsing (ritual.yaml)
//! - The manifest and lock model shared by backup and retention
//! - Progress events and sinks
//! - The storage and streaming transport ports with filesystem adapters
//!   (and S3 adapters behind the `s3` feature)

pub mod config;
pub mod error;
pub mod events;
pub mod manifest;
pub mod storage;
pub mod transport;

pub use config::{RemoteBackend, RitualConfig};
pub use error::{Error, Result};
pub use events::{Event, EventSink, NoopSink, TracingSink};
pub use manifest::{LockToken, Manifest, World};
pub use storage::{FsStorage, Storage};
pub use transport::{BoxReader, FsTransport, Transport};

/// Library version, recorded as `ritual_version` in new manifests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Configuration file loading and validation
//!
//! All filesystem roots used by the backup targets come from an explicitly
//! constructed [`RitualConfig`]; nothing is derived from process globals after
//! loading.

use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Configuration file names to search for
const CONFIG_FILE_NAMES: &[&str] = &["ritual.yaml", "ritual.yml"];

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RitualConfig {
    /// Base directory for local state
    pub root: Utf8PathBuf,

    /// Identifier written into lock tokens
    pub machine_id: String,

    /// Storage key of the manifest within the remote store
    pub manifest_key: String,

    pub local: LocalConfig,

    pub remote: RemoteConfig,

    pub archive: ArchiveSettings,

    /// Seconds between transport progress events
    pub progress_interval_secs: u64,
}

/// Local backup target settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Subdirectory of `root` acting as the local bucket
    pub bucket: String,
    pub backup_dir: String,
    pub max_backups: usize,
}

/// Which object store backs the remote target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    /// A directory standing in for an object store
    #[default]
    Filesystem,
    S3,
}

/// Remote backup target settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub backend: RemoteBackend,
    pub bucket: String,
    pub backup_dir: String,
    pub max_backups: usize,

    /// Root directory of the filesystem backend; defaults to `<root>/remote`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<Utf8PathBuf>,

    /// Region of the S3 backend
    pub region: String,

    /// Custom endpoint for S3-compatible services
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Keep a local copy of every remote backup under the local backup dir
    pub keep_local_copy: bool,
}

/// Archive pipeline tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// File extension of stored archives, without the leading dot
    pub extension: String,

    /// Capacity of the producer/consumer handoff buffer, in chunks
    pub buffer_chunks: usize,

    /// Size of one handoff chunk in bytes
    pub chunk_size: usize,
}

impl Default for RitualConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            machine_id: default_machine_id(),
            manifest_key: "manifest.json".to_string(),
            local: LocalConfig::default(),
            remote: RemoteConfig::default(),
            archive: ArchiveSettings::default(),
            progress_interval_secs: 5,
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            bucket: "local".to_string(),
            backup_dir: "backups".to_string(),
            max_backups: 5,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: RemoteBackend::Filesystem,
            bucket: "ritual".to_string(),
            backup_dir: "worlds".to_string(),
            max_backups: 10,
            root: None,
            region: "us-east-1".to_string(),
            endpoint: None,
            keep_local_copy: false,
        }
    }
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            extension: "tar.gz".to_string(),
            buffer_chunks: 16,
            chunk_size: 64 * 1024,
        }
    }
}

impl RitualConfig {
    /// Loads configuration from `path`, or from `ritual.yaml` in the working
    /// directory, falling back to defaults when no file exists.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let content = match path {
            Some(p) => Some(
                fs::read_to_string(p)
                    .map_err(|e| Error::io(format!("reading config {}", p), e))?,
            ),
            None => CONFIG_FILE_NAMES
                .iter()
                .map(Utf8Path::new)
                .find(|candidate| candidate.exists())
                .map(|found| {
                    fs::read_to_string(found)
                        .map_err(|e| Error::io(format!("reading config {}", found), e))
                })
                .transpose()?,
        };

        let config = match content {
            Some(content) => Self::from_yaml(&content)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(content)?)
    }

    /// Rejects configurations the targets cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.root.as_str().is_empty() {
            return Err(Error::validation("root must not be empty"));
        }
        if self.machine_id.is_empty() {
            return Err(Error::validation("machine_id must not be empty"));
        }
        if self.manifest_key.is_empty() {
            return Err(Error::validation("manifest_key must not be empty"));
        }
        for (field, value) in [
            ("local.bucket", &self.local.bucket),
            ("local.backup_dir", &self.local.backup_dir),
            ("remote.bucket", &self.remote.bucket),
            ("remote.backup_dir", &self.remote.backup_dir),
            ("archive.extension", &self.archive.extension),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation(format!("{} must not be empty", field)));
            }
        }
        if self.local.max_backups == 0 || self.remote.max_backups == 0 {
            return Err(Error::validation("max_backups must be at least 1"));
        }
        if self.archive.buffer_chunks == 0 || self.archive.chunk_size == 0 {
            return Err(Error::validation(
                "archive buffer_chunks and chunk_size must be positive",
            ));
        }
        if self.progress_interval_secs == 0 {
            return Err(Error::validation("progress_interval_secs must be positive"));
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    /// Root directory of the filesystem remote backend.
    pub fn remote_root(&self) -> Utf8PathBuf {
        self.remote
            .root
            .clone()
            .unwrap_or_else(|| self.root.join("remote"))
    }
}

fn default_root() -> Utf8PathBuf {
    std::env::var("HOME")
        .ok()
        .map(std::path::PathBuf::from)
        .or_else(dirs::home_dir)
        .and_then(|home| Utf8PathBuf::from_path_buf(home).ok())
        .map(|home| home.join(".ritual"))
        .unwrap_or_else(|| Utf8PathBuf::from(".ritual"))
}

fn default_machine_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

//! Key/value storage port.
//!
//! Every component that lists, reads or deletes stored objects goes through
//! [`Storage`]. Keys are forward-slash normalized before use.

mod fs;
#[cfg(feature = "s3")]
pub(crate) mod s3;

pub use fs::FsStorage;
#[cfg(feature = "s3")]
pub use s3::S3Storage;

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Byte storage with prefix listing.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Reads the object stored under `key`. Missing keys yield [`Error::NotFound`].
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Writes `data` under `key`, replacing any previous object.
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Lists every key starting with `prefix`, sorted lexically.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn copy(&self, src_key: &str, dst_key: &str) -> Result<()>;
}

/// Converts backslashes to forward slashes and strips leading and duplicate separators.
pub fn normalize_key(key: &str) -> String {
    key.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolves `relative` beneath `root`, refusing anything that could escape it.
///
/// `relative` must be a relative path made of normal components only; `.`
/// segments are dropped and any `..`, root or prefix component is rejected.
pub fn confine(root: &Path, relative: &Path) -> Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;

    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::path_traversal(relative.display().to_string()));
            }
        }
    }

    if depth == 0 || !resolved.starts_with(root) {
        return Err(Error::path_traversal(relative.display().to_string()));
    }

    Ok(resolved)
}

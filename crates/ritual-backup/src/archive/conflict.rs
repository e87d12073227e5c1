//! Conflict strategies: what a pull does with files that already exist
//!
//! Strategies only apply to regular files; directories are always merged.

use ritual_core::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Policy for an extraction target that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictStrategy {
    /// Overwrite the existing file
    Replace,
    /// Leave the existing file untouched
    #[default]
    Skip,
    /// Rename the existing file to `<name>.bak`, then write
    Backup,
    /// Abort the whole pull
    Fail,
}

/// Outcome of resolving a conflict for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictAction {
    /// Write the incoming file
    Write,
    /// Do not write the incoming file
    Skip,
    /// Existing file moved aside; write the incoming file
    BackedUp(PathBuf),
}

impl ConflictStrategy {
    /// Applies the strategy to `target`, which must already exist.
    pub fn resolve(&self, target: &Path) -> Result<ConflictAction> {
        match self {
            Self::Replace => {
                warn!("Overwriting existing file: {}", target.display());
                Ok(ConflictAction::Write)
            }
            Self::Skip => {
                debug!("Skipping existing file: {}", target.display());
                Ok(ConflictAction::Skip)
            }
            Self::Backup => {
                let backup_path = backup_path_for(target);
                std::fs::rename(target, &backup_path).map_err(|e| {
                    Error::io(
                        format!("moving {} to {}", target.display(), backup_path.display()),
                        e,
                    )
                })?;
                info!(
                    "Backed up existing file: {} -> {}",
                    target.display(),
                    backup_path.display()
                );
                Ok(ConflictAction::BackedUp(backup_path))
            }
            Self::Fail => Err(Error::already_exists(target.display().to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Skip => "skip",
            Self::Backup => "backup",
            Self::Fail => "fail",
        }
    }
}

impl FromStr for ConflictStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "skip" => Ok(Self::Skip),
            "backup" => Ok(Self::Backup),
            "fail" => Ok(Self::Fail),
            _ => Err(Error::validation(format!(
                "Invalid conflict strategy: {}. Valid strategies: replace, skip, backup, fail",
                s
            ))),
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<name>.bak` next to `target`.
fn backup_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

//! Key naming and discovery of stored backups.

use chrono::{DateTime, NaiveDateTime, Utc};
use ritual_core::storage::normalize_key;
use ritual_core::{Error, Result, Storage};
use std::sync::Arc;
use tracing::{debug, warn};

/// Digits of a unix-seconds timestamp in flat keys.
const UNIX_SECONDS_LEN: usize = 10;

/// `YYYYMMDDhhmmss`
const GROUPED_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const GROUPED_TIMESTAMP_LEN: usize = 14;

/// How backup keys are laid out beneath the backup directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLayout {
    /// `<dir>/<unixSeconds>_<name>.<ext>`
    Flat,
    /// `<dir>/<name>/<YYYYMMDDhhmmss>.<ext>`
    Grouped,
}

impl KeyLayout {
    fn timestamp_len(&self) -> usize {
        match self {
            Self::Flat => UNIX_SECONDS_LEN,
            Self::Grouped => GROUPED_TIMESTAMP_LEN,
        }
    }

    /// Relative key (without the backup directory) for `name` at `at`.
    pub(crate) fn relative_key(&self, name: &str, extension: &str, at: DateTime<Utc>) -> String {
        match self {
            Self::Flat => format!("{}_{}.{}", at.timestamp(), name, extension),
            Self::Grouped => format!(
                "{}/{}.{}",
                name,
                at.format(GROUPED_TIMESTAMP_FORMAT),
                extension
            ),
        }
    }

    /// Parses the timestamp out of a file name with its extension removed.
    fn parse_timestamp(&self, stem: &str) -> Result<DateTime<Utc>> {
        match self {
            Self::Flat => {
                let (seconds, _) = stem
                    .split_once('_')
                    .ok_or_else(|| Error::invalid_timestamp(stem))?;
                if seconds.is_empty() || !seconds.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(Error::invalid_timestamp(seconds));
                }
                seconds
                    .parse::<i64>()
                    .ok()
                    .and_then(|s| DateTime::from_timestamp(s, 0))
                    .ok_or_else(|| Error::invalid_timestamp(seconds))
            }
            Self::Grouped => {
                let split = stem.len().saturating_sub(GROUPED_TIMESTAMP_LEN);
                let digits = stem
                    .get(split..)
                    .filter(|d| d.len() == GROUPED_TIMESTAMP_LEN)
                    .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
                    .ok_or_else(|| Error::invalid_timestamp(stem))?;
                NaiveDateTime::parse_from_str(digits, GROUPED_TIMESTAMP_FORMAT)
                    .map(|naive| naive.and_utc())
                    .map_err(|_| Error::invalid_timestamp(digits))
            }
        }
    }
}

/// A stored backup that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFile {
    pub key: String,
    pub timestamp: DateTime<Utc>,
}

/// The backups kept under one directory of a storage.
#[derive(Clone)]
pub struct BackupStore {
    storage: Arc<dyn Storage>,
    backup_dir: String,
    extension: String,
    layout: KeyLayout,
}

impl BackupStore {
    pub fn new(
        storage: Arc<dyn Storage>,
        backup_dir: &str,
        extension: &str,
        layout: KeyLayout,
    ) -> Result<Self> {
        let backup_dir = normalize_key(backup_dir);
        if backup_dir.is_empty() {
            return Err(Error::validation("backup directory must not be empty"));
        }
        let extension = extension.trim_start_matches('.').to_string();
        if extension.is_empty() {
            return Err(Error::validation("backup extension must not be empty"));
        }
        Ok(Self {
            storage,
            backup_dir,
            extension,
            layout,
        })
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn backup_dir(&self) -> &str {
        &self.backup_dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn layout(&self) -> KeyLayout {
        self.layout
    }

    /// Storage key for a new backup of `name` taken at `at`.
    pub fn key_for(&self, name: &str, at: DateTime<Utc>) -> Result<String> {
        validate_name(name)?;
        Ok(format!(
            "{}/{}",
            self.backup_dir,
            self.layout.relative_key(name, &self.extension, at)
        ))
    }

    /// Lists valid backups, newest first.
    ///
    /// Keys that do not look like backups are deleted on sight; failing to
    /// delete one is an error.
    pub async fn backup_files(&self) -> Result<Vec<BackupFile>> {
        let prefix = format!("{}/", self.backup_dir);
        let keys = self.storage.list(&prefix).await?;

        let mut files = Vec::with_capacity(keys.len());
        for key in keys {
            match self.parse_key(&key) {
                Ok(timestamp) => files.push(BackupFile { key, timestamp }),
                Err(reason) => {
                    warn!("Removing invalid backup {}: {}", key, reason);
                    self.delete(&key).await?;
                }
            }
        }

        // stable, so equal timestamps keep listing order
        files.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        debug!("Found {} backups under {}", files.len(), prefix);
        Ok(files)
    }

    /// Newest valid backup, if any.
    pub async fn newest(&self) -> Result<Option<BackupFile>> {
        Ok(self.backup_files().await?.into_iter().next())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.storage
            .delete(key)
            .await
            .map_err(|e| Error::transport("delete", key, e))
    }

    fn parse_key(&self, key: &str) -> Result<DateTime<Utc>> {
        let file_name = key.rsplit('/').next().unwrap_or(key);
        let suffix = format!(".{}", self.extension);

        if !file_name.ends_with(&suffix) {
            return Err(Error::validation(format!(
                "extension is not {}",
                self.extension
            )));
        }
        if file_name.len() < suffix.len() + self.layout.timestamp_len() {
            return Err(Error::validation("file name too short"));
        }

        let stem = &file_name[..file_name.len() - suffix.len()];
        self.layout.parse_timestamp(stem)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation("backup name must not be empty"));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(Error::validation(format!(
            "backup name must be a single path segment: {}",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ritual_core::FsStorage;
    use tempfile::TempDir;

    fn store(temp_dir: &TempDir, layout: KeyLayout) -> BackupStore {
        let storage = Arc::new(FsStorage::new(temp_dir.path()));
        BackupStore::new(storage, "backups", "tar.gz", layout).unwrap()
    }

    fn at(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 12, 30, 45).unwrap()
    }

    #[test]
    fn test_key_layouts() {
        let temp_dir = TempDir::new().unwrap();
        let time = at(2024, 3, 9);

        let flat = store(&temp_dir, KeyLayout::Flat);
        assert_eq!(
            flat.key_for("survival", time).unwrap(),
            format!("backups/{}_survival.tar.gz", time.timestamp())
        );

        let grouped = store(&temp_dir, KeyLayout::Grouped);
        assert_eq!(
            grouped.key_for("survival", time).unwrap(),
            "backups/survival/20240309123045.tar.gz"
        );
    }

    #[test]
    fn test_key_for_rejects_bad_names() {
        let temp_dir = TempDir::new().unwrap();
        let flat = store(&temp_dir, KeyLayout::Flat);
        assert!(flat.key_for("", Utc::now()).is_err());
        assert!(flat.key_for("a/b", Utc::now()).is_err());
        assert!(flat.key_for("..", Utc::now()).is_err());
    }

    #[test]
    fn test_parse_round_trips_through_keys() {
        let temp_dir = TempDir::new().unwrap();
        let time = at(2023, 12, 31);
        for layout in [KeyLayout::Flat, KeyLayout::Grouped] {
            let store = store(&temp_dir, layout);
            let key = store.key_for("world_nether", time).unwrap();
            assert_eq!(store.parse_key(&key).unwrap(), time);
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let temp_dir = TempDir::new().unwrap();
        let flat = store(&temp_dir, KeyLayout::Flat);
        assert!(flat.parse_key("backups/invalid.zip").is_err());
        assert!(flat.parse_key("backups/a.tar.gz").is_err());
        assert!(flat.parse_key("backups/12345abcde_world.tar.gz").is_err());
        assert!(flat.parse_key("backups/nounderscoreatall.tar.gz").is_err());

        let grouped = store(&temp_dir, KeyLayout::Grouped);
        assert!(grouped.parse_key("backups/w/20241399000000.tar.gz").is_err());
        assert!(grouped.parse_key("backups/w/2024010100000x.tar.gz").is_err());
        assert!(grouped.parse_key("backups/w/2024.tar.gz").is_err());
    }

    #[tokio::test]
    async fn test_backup_files_sorted_and_self_healing() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, KeyLayout::Grouped);
        let storage = store.storage().clone();

        for key in [
            "backups/w/20240101000000.tar.gz",
            "backups/w/20240301000000.tar.gz",
            "backups/w/20240201000000.tar.gz",
            "backups/invalid.zip",
        ] {
            storage.put(key, b"x").await.unwrap();
        }

        let files = store.backup_files().await.unwrap();
        let keys: Vec<_> = files.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "backups/w/20240301000000.tar.gz",
                "backups/w/20240201000000.tar.gz",
                "backups/w/20240101000000.tar.gz",
            ]
        );
        assert!(!temp_dir.path().join("backups/invalid.zip").exists());
    }

    #[tokio::test]
    async fn test_newest_on_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, KeyLayout::Flat);
        assert!(store.newest().await.unwrap().is_none());
    }
}

//! Manifest and lock model.
//!
//! The manifest is the remotely persisted record of lock state, instance
//! version and known backups ("worlds"). It is fetched once per orchestration
//! pass, mutated in memory and written back whole.

use crate::error::{Error, Result};
use crate::storage::normalize_key;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between the machine identifier and the timestamp of a lock token.
pub const LOCK_TOKEN_SEPARATOR: &str = "::";

/// One stored backup's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWorld")]
pub struct World {
    uri: String,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawWorld {
    uri: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<RawWorld> for World {
    type Error = Error;

    fn try_from(raw: RawWorld) -> Result<Self> {
        World::new(raw.uri, raw.created_at)
    }
}

impl World {
    /// Creates a world entry, normalizing the URI to forward slashes.
    pub fn new(uri: impl AsRef<str>, created_at: DateTime<Utc>) -> Result<Self> {
        let uri = normalize_key(uri.as_ref());
        if uri.is_empty() {
            return Err(Error::validation("world URI must not be empty"));
        }
        Ok(Self { uri, created_at })
    }

    /// Storage key of the backup.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Versioned record of lock state and known backups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub ritual_version: String,

    /// Lock token of the current holder, empty when unlocked
    #[serde(default)]
    pub locked_by: String,

    #[serde(default)]
    pub instance_version: String,

    #[serde(default)]
    pub worlds: Vec<World>,

    pub updated_at: DateTime<Utc>,
}

impl Manifest {
    /// Creates an empty, unlocked manifest.
    pub fn new(ritual_version: impl Into<String>) -> Self {
        Self {
            ritual_version: ritual_version.into(),
            locked_by: String::new(),
            instance_version: String::new(),
            worlds: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_locked(&self) -> bool {
        !self.locked_by.is_empty()
    }

    /// Records `token` as the lock holder. Last write wins.
    pub fn lock(&mut self, token: impl Into<String>) {
        self.locked_by = token.into();
        self.touch();
    }

    pub fn unlock(&mut self) {
        self.locked_by.clear();
        self.touch();
    }

    /// Appends a world in insertion order.
    pub fn add_world(&mut self, world: World) {
        self.worlds.push(world);
        self.touch();
    }

    /// Returns the world with the greatest `created_at`.
    ///
    /// On equal timestamps the first one encountered in insertion order wins.
    pub fn latest_world(&self) -> Option<&World> {
        latest_of(self.worlds.iter())
    }

    /// Like [`Manifest::latest_world`], restricted to URIs below `dir`.
    pub fn latest_world_under(&self, dir: &str) -> Option<&World> {
        let prefix = format!("{}/", normalize_key(dir));
        latest_of(self.worlds.iter().filter(|w| w.uri.starts_with(&prefix)))
    }

    /// Keeps the newest `max_count` worlds and returns the removed (oldest) ones.
    ///
    /// Returns nothing and leaves the manifest untouched when `max_count` is
    /// zero or the manifest already holds at most `max_count` worlds.
    pub fn remove_oldest_worlds(&mut self, max_count: usize) -> Vec<World> {
        if max_count == 0 || self.worlds.len() <= max_count {
            return Vec::new();
        }

        // stable: insertion order is kept among equal timestamps
        self.worlds.sort_by_key(|w| w.created_at);
        let excess = self.worlds.len() - max_count;
        let removed: Vec<World> = self.worlds.drain(..excess).collect();
        self.touch();
        removed
    }

    /// Removes the worlds whose URI is listed in `uris` and returns them.
    pub fn forget_worlds(&mut self, uris: &[String]) -> Vec<World> {
        let uris: Vec<String> = uris.iter().map(|u| normalize_key(u)).collect();
        let (forgotten, kept): (Vec<World>, Vec<World>) = std::mem::take(&mut self.worlds)
            .into_iter()
            .partition(|w| uris.contains(&w.uri));
        self.worlds = kept;
        if !forgotten.is_empty() {
            self.touch();
        }
        forgotten
    }

    /// Deep copy with `updated_at` reset to now.
    pub fn clone_fresh(&self) -> Self {
        let mut copy = self.clone();
        copy.updated_at = Utc::now();
        copy
    }

    /// Returns true if some world references `key`.
    pub fn contains_uri(&self, key: &str) -> bool {
        let key = normalize_key(key);
        self.worlds.iter().any(|w| w.uri == key)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn latest_of<'a>(worlds: impl Iterator<Item = &'a World>) -> Option<&'a World> {
    let mut latest: Option<&World> = None;
    for world in worlds {
        match latest {
            Some(current) if world.created_at <= current.created_at => {}
            _ => latest = Some(world),
        }
    }
    latest
}

/// Advisory lock token of the form `{machine}::{unix-timestamp}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub machine: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockToken {
    /// Creates a token for `machine` stamped with the current time.
    pub fn new(machine: impl Into<String>) -> Result<Self> {
        let machine = machine.into();
        if machine.is_empty() {
            return Err(Error::validation("lock token machine identifier must not be empty"));
        }
        Ok(Self {
            machine,
            acquired_at: Utc::now(),
        })
    }

    /// Parses a token previously produced by [`LockToken::to_string`].
    pub fn parse(token: &str) -> Result<Self> {
        let (machine, timestamp) = token
            .rsplit_once(LOCK_TOKEN_SEPARATOR)
            .ok_or_else(|| Error::validation(format!("malformed lock token: {}", token)))?;

        if machine.is_empty() {
            return Err(Error::validation(format!("malformed lock token: {}", token)));
        }

        let seconds: i64 = timestamp
            .parse()
            .map_err(|_| Error::invalid_timestamp(timestamp))?;
        let acquired_at = Utc
            .timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| Error::invalid_timestamp(timestamp))?;

        Ok(Self {
            machine: machine.to_string(),
            acquired_at,
        })
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.machine,
            LOCK_TOKEN_SEPARATOR,
            self.acquired_at.timestamp()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn world(uri: &str, offset_secs: i64) -> World {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        World::new(uri, base + Duration::seconds(offset_secs)).unwrap()
    }

    #[test]
    fn test_world_rejects_empty_uri() {
        assert!(World::new("", Utc::now()).is_err());
    }

    #[test]
    fn test_world_normalizes_uri() {
        let w = World::new("backups\\1_world.tar.gz", Utc::now()).unwrap();
        assert_eq!(w.uri(), "backups/1_world.tar.gz");
    }

    #[test]
    fn test_lock_unlock() {
        let mut manifest = Manifest::new("1.0.0");
        assert!(!manifest.is_locked());

        manifest.lock("x");
        assert!(manifest.is_locked());
        assert_eq!(manifest.locked_by, "x");

        manifest.unlock();
        assert!(!manifest.is_locked());
    }

    #[test]
    fn test_mutations_bump_updated_at() {
        let mut manifest = Manifest::new("1.0.0");
        let stale = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();

        manifest.updated_at = stale;
        manifest.lock("host::1");
        assert!(manifest.updated_at > stale);

        manifest.updated_at = stale;
        manifest.unlock();
        assert!(manifest.updated_at > stale);

        manifest.updated_at = stale;
        manifest.add_world(world("a", 0));
        assert!(manifest.updated_at > stale);

        manifest.add_world(world("b", 1));
        manifest.updated_at = stale;
        manifest.remove_oldest_worlds(1);
        assert!(manifest.updated_at > stale);
    }

    #[test]
    fn test_latest_world() {
        let mut manifest = Manifest::new("1.0.0");
        assert!(manifest.latest_world().is_none());

        manifest.add_world(world("b", 20));
        manifest.add_world(world("c", 30));
        manifest.add_world(world("a", 10));

        assert_eq!(manifest.latest_world().unwrap().uri(), "c");
    }

    #[test]
    fn test_latest_world_tie_keeps_first() {
        let mut manifest = Manifest::new("1.0.0");
        manifest.add_world(world("first", 5));
        manifest.add_world(world("second", 5));
        assert_eq!(manifest.latest_world().unwrap().uri(), "first");
    }

    #[test]
    fn test_latest_world_under_directory() {
        let mut manifest = Manifest::new("1.0.0");
        manifest.add_world(world("worlds/survival/20240101000000.tar.gz", 10));
        manifest.add_world(world("backups/1704067220_survival.tar.gz", 20));
        manifest.add_world(world("worlds-old/x.tar.gz", 30));

        assert_eq!(
            manifest.latest_world_under("worlds").unwrap().uri(),
            "worlds/survival/20240101000000.tar.gz"
        );
        assert_eq!(
            manifest.latest_world_under("backups/").unwrap().uri(),
            "backups/1704067220_survival.tar.gz"
        );
        assert!(manifest.latest_world_under("missing").is_none());
    }

    #[test]
    fn test_remove_oldest_worlds() {
        let mut manifest = Manifest::new("1.0.0");
        manifest.add_world(world("w3", 3));
        manifest.add_world(world("w1", 1));
        manifest.add_world(world("w5", 5));
        manifest.add_world(world("w2", 2));
        manifest.add_world(world("w4", 4));

        let removed = manifest.remove_oldest_worlds(3);
        let removed: Vec<&str> = removed.iter().map(|w| w.uri()).collect();
        assert_eq!(removed, vec!["w1", "w2"]);

        let kept: Vec<&str> = manifest.worlds.iter().map(|w| w.uri()).collect();
        assert_eq!(kept, vec!["w3", "w4", "w5"]);
    }

    #[test]
    fn test_remove_oldest_worlds_noop() {
        let mut manifest = Manifest::new("1.0.0");
        manifest.add_world(world("w1", 1));
        manifest.add_world(world("w2", 2));

        assert!(manifest.remove_oldest_worlds(0).is_empty());
        assert!(manifest.remove_oldest_worlds(2).is_empty());
        assert!(manifest.remove_oldest_worlds(5).is_empty());
        assert_eq!(manifest.worlds.len(), 2);
    }

    #[test]
    fn test_forget_worlds() {
        let mut manifest = Manifest::new("1.0.0");
        manifest.add_world(world("worlds/a", 0));
        manifest.add_world(world("worlds/b", 10));
        manifest.add_world(world("worlds/c", 20));

        let forgotten = manifest.forget_worlds(&["worlds\\b".to_string(), "worlds/x".to_string()]);
        assert_eq!(forgotten, vec![world("worlds/b", 10)]);
        let uris: Vec<_> = manifest.worlds.iter().map(|w| w.uri()).collect();
        assert_eq!(uris, vec!["worlds/a", "worlds/c"]);

        assert!(manifest.forget_worlds(&[]).is_empty());
    }

    #[test]
    fn test_clone_fresh_is_deep() {
        let mut manifest = Manifest::new("1.0.0");
        manifest.add_world(world("w1", 1));
        manifest.updated_at = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();

        let mut copy = manifest.clone_fresh();
        assert!(copy.updated_at > manifest.updated_at);

        copy.add_world(world("w2", 2));
        assert_eq!(manifest.worlds.len(), 1);
        assert_eq!(copy.worlds.len(), 2);
    }

    #[test]
    fn test_persisted_field_names() {
        let mut manifest = Manifest::new("1.2.0");
        manifest.instance_version = "1.20.4".to_string();
        manifest.add_world(world("worlds/survival/20240101000000.tar.gz", 0));

        let json = manifest.to_json().unwrap();
        for field in [
            "ritual_version",
            "locked_by",
            "instance_version",
            "worlds",
            "uri",
            "created_at",
            "updated_at",
        ] {
            assert!(json.contains(field), "missing field {}", field);
        }

        let parsed = Manifest::from_json(&json).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_deserialize_rejects_empty_world_uri() {
        let json = r#"{
            "ritual_version": "1.0.0",
            "locked_by": "",
            "instance_version": "",
            "worlds": [{"uri": "", "created_at": "2024-01-01T00:00:00Z"}],
            "updated_at": "2024-01-01T00:00:00Z"
        }"#;
        assert!(Manifest::from_json(json).is_err());
    }

    #[test]
    fn test_lock_token_format() {
        let token = LockToken::new("host-a").unwrap();
        let rendered = token.to_string();
        assert!(rendered.starts_with("host-a::"));

        let parsed = LockToken::parse(&rendered).unwrap();
        assert_eq!(parsed.machine, "host-a");
        assert_eq!(parsed.acquired_at.timestamp(), token.acquired_at.timestamp());
    }

    #[test]
    fn test_lock_token_parse_errors() {
        assert!(LockToken::parse("no-separator").is_err());
        assert!(LockToken::parse("::123").is_err());
        assert!(LockToken::parse("host::abc").is_err());
        assert!(LockToken::new("").is_err());
    }
}

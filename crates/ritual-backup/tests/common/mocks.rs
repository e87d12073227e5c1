//! Storage doubles.

#![allow(dead_code)]

use async_trait::async_trait;
use ritual_core::{Error, FsStorage, Result, Storage};
use std::io;
use std::sync::Mutex;

/// Filesystem storage whose `delete` fails for one key and records every attempt.
pub struct FailingDeleteStorage {
    inner: FsStorage,
    fail_on: String,
    attempts: Mutex<Vec<String>>,
}

impl FailingDeleteStorage {
    pub fn new(inner: FsStorage, fail_on: impl Into<String>) -> Self {
        Self {
            inner,
            fail_on: fail_on.into(),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Storage for FailingDeleteStorage {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.inner.put(key, data).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.attempts.lock().unwrap().push(key.to_string());
        if key == self.fail_on {
            return Err(Error::io(
                key,
                io::Error::new(io::ErrorKind::PermissionDenied, "delete refused"),
            ));
        }
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn copy(&self, src_key: &str, dst_key: &str) -> Result<()> {
        self.inner.copy(src_key, dst_key).await
    }
}

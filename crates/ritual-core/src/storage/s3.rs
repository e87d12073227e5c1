//! S3 storage adapter
//!
//! Supports AWS S3 and S3-compatible storage (MinIO, Wasabi, DigitalOcean Spaces).

use super::{normalize_key, Storage};
use crate::error::{Error, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::debug;

/// Storage port over a single S3 bucket.
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Builds a client from the ambient AWS configuration.
    pub async fn from_params(
        bucket: impl Into<String>,
        region: &str,
        endpoint: Option<&str>,
    ) -> Result<Self> {
        Ok(Self::new(create_client(region, endpoint).await, bucket))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Creates an S3 client with the given region and optional endpoint
pub(crate) async fn create_client(region: &str, endpoint: Option<&str>) -> Client {
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await;

    let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
    if let Some(endpoint_url) = endpoint {
        debug!("Using custom S3 endpoint: {}", endpoint_url);
        builder = builder.endpoint_url(endpoint_url).force_path_style(true);
    }

    Client::from_conf(builder.build())
}

#[async_trait]
impl Storage for S3Storage {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let key = normalize_key(key);
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    return Err(Error::not_found(key));
                }
                return Err(Error::transport("get", key, service_error));
            }
        };

        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| Error::transport("get", key.as_str(), e))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let key = normalize_key(key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| Error::transport("put", key.as_str(), e.into_service_error()))?;
        debug!("Stored {} bytes at s3://{}/{}", data.len(), self.bucket, key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = normalize_key(key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| Error::transport("delete", key.as_str(), e.into_service_error()))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.replace('\\', "/");
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| Error::transport("list", prefix.as_str(), e.into_service_error()))?;

            keys.extend(
                resp.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match resp.next_continuation_token() {
                Some(token) if resp.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn copy(&self, src_key: &str, dst_key: &str) -> Result<()> {
        let src_key = normalize_key(src_key);
        let dst_key = normalize_key(dst_key);
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, src_key))
            .key(&dst_key)
            .send()
            .await
            .map_err(|e| Error::transport("copy", src_key.as_str(), e.into_service_error()))?;
        Ok(())
    }
}

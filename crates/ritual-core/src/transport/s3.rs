//! S3 streaming transport using multipart uploads

use super::{BoxReader, ProgressReader, Transport, DEFAULT_PROGRESS_INTERVAL};
use crate::error::{Error, Result};
use crate::events::{EventSink, NoopSink};
use crate::storage::normalize_key;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Minimum part size accepted by S3 for all but the last part.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Transport over an S3 client; `bucket` arguments name S3 buckets.
#[derive(Clone)]
pub struct S3Transport {
    client: Client,
    events: Arc<dyn EventSink>,
    interval: Duration,
}

impl S3Transport {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            events: Arc::new(NoopSink),
            interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Builds a client from the ambient AWS configuration.
    pub async fn from_params(region: &str, endpoint: Option<&str>) -> Self {
        Self::new(crate::storage::s3::create_client(region, endpoint).await)
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        reader: &mut ProgressReader<BoxReader>,
    ) -> Result<(u64, Vec<CompletedPart>)> {
        let mut parts = Vec::new();
        let mut total = 0u64;
        let mut part_number = 1i32;

        loop {
            let mut buffer = Vec::with_capacity(PART_SIZE);
            while buffer.len() < PART_SIZE {
                let read = (&mut *reader)
                    .take((PART_SIZE - buffer.len()) as u64)
                    .read_to_end(&mut buffer)
                    .await
                    .map_err(|e| Error::transport("upload", key, e))?;
                if read == 0 {
                    break;
                }
            }

            // an empty object still needs exactly one (empty) part
            if buffer.is_empty() && part_number > 1 {
                break;
            }

            let len = buffer.len();
            let resp = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buffer))
                .send()
                .await
                .map_err(|e| Error::transport("upload", key, e.into_service_error()))?;

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(resp.e_tag().map(str::to_string))
                    .build(),
            );
            total += len as u64;
            part_number += 1;

            if len < PART_SIZE {
                break;
            }
        }

        Ok((total, parts))
    }
}

#[async_trait]
impl Transport for S3Transport {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        reader: BoxReader,
        size_hint: i64,
    ) -> Result<u64> {
        let key = normalize_key(key);
        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| Error::transport("upload", key.as_str(), e.into_service_error()))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| Error::transport("upload", key.as_str(), "missing upload id"))?
            .to_string();

        let mut reader = ProgressReader::new(
            reader,
            format!("upload {}", key),
            self.events.clone(),
            size_hint,
            self.interval,
        );

        let (total, parts) = match self.upload_parts(bucket, &key, &upload_id, &mut reader).await
        {
            Ok(done) => done,
            Err(e) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(&key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!("Failed to abort multipart upload for {}: {}", key, abort);
                }
                return Err(e);
            }
        };

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(&key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| Error::transport("upload", key.as_str(), e.into_service_error()))?;

        debug!("Uploaded {} bytes to s3://{}/{}", total, bucket, key);
        Ok(total)
    }

    async fn download(&self, bucket: &str, key: &str) -> Result<BoxReader> {
        let key = normalize_key(key);
        let resp = match self.client.get_object().bucket(bucket).key(&key).send().await {
            Ok(resp) => resp,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    return Err(Error::not_found(key));
                }
                return Err(Error::transport("download", key, service_error));
            }
        };

        let size = resp.content_length().unwrap_or(-1);
        Ok(Box::new(ProgressReader::new(
            resp.body.into_async_read(),
            format!("download {}", key),
            self.events.clone(),
            size,
            self.interval,
        )))
    }
}

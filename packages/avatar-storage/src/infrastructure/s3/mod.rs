//! Object storage implementation using S3/MinIO
//!
//! Stores uploaded images, voice samples, synthesized audio and rendered
//! video. Keys handed to callers never include the configured path prefix.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::domain::{ArtifactKey, ObjectStore};
use crate::{Result, StorageError};

/// S3/MinIO configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,

    /// AWS region (e.g., "us-east-1")
    pub region: String,

    /// S3 endpoint (custom for `MinIO`, empty for AWS S3)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Path prefix for all objects (e.g., "avatar/")
    #[serde(default)]
    pub prefix: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: "avatar-render".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            prefix: String::new(),
        }
    }
}

/// S3/MinIO object storage implementation
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3ObjectStore {
    /// Create a client. Credentials come from `AWS_ACCESS_KEY_ID` /
    /// `AWS_SECRET_ACCESS_KEY` (and optional `AWS_SESSION_TOKEN`).
    pub fn new(config: S3Config) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(StorageError::config("S3 bucket name is empty"));
        }

        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default();
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default();
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        let credentials = Credentials::new(
            access_key_id,
            secret_access_key,
            session_token,
            None,
            "avatar-storage",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .behavior_version_latest();

        // Set custom endpoint for MinIO
        if let Some(endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            prefix: config.prefix,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Combine prefix with key
    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    fn logical_key(&self, full_key: &str) -> String {
        full_key
            .strip_prefix(self.prefix.as_str())
            .unwrap_or(full_key)
            .to_string()
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &ArtifactKey, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let full_key = self.full_key(key.as_str());
        debug!("PUT s3://{}/{} ({} bytes)", self.bucket, full_key, bytes.len());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::object_store(format!("put {}: {}", full_key, e)))?;

        Ok(())
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Vec<u8>> {
        let full_key = self.full_key(key.as_str());

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    StorageError::object_not_found(full_key.clone())
                } else {
                    StorageError::object_store(format!("get {}: {}", full_key, e))
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::object_store(format!("read {}: {}", full_key, e)))?;

        Ok(bytes.to_vec())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactKey>> {
        let full_prefix = self.full_key(prefix);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    StorageError::object_store(format!("list {}: {}", full_prefix, e))
                })?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .map(|k| ArtifactKey::new(self.logical_key(k))),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn presign(&self, key: &ArtifactKey, ttl: Duration) -> Result<String> {
        let full_key = self.full_key(key.as_str());
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| StorageError::config(format!("invalid presign ttl: {}", e)))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::object_store(format!("presign {}: {}", full_key, e)))?;

        Ok(request.uri().to_string())
    }

    fn location_uri(&self, prefix: &str) -> String {
        format!("s3://{}/{}", self.bucket, self.full_key(prefix))
    }

    fn prefix_from_location(&self, location: &str) -> Option<String> {
        let rest = location.strip_prefix("s3://")?;
        let (bucket, path) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket != self.bucket {
            return None;
        }
        Some(self.logical_key(path))
    }
}

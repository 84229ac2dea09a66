use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use tracing::{debug, info, instrument};

use crate::error::UploadError;

pub mod config;

use config::StorageConfig;

/// Remote blob store the uploader writes to
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `path` under `key`, returning its public URL.
    ///
    /// `sha256` is the hex digest of the file contents.
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        sha256: &str,
    ) -> Result<String, UploadError>;
}

/// Object key of `filename` for `entity_name` under `prefix`
pub fn build_key(prefix: &str, entity_name: &str, filename: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}/{}", entity_name, filename)
    } else {
        format!("{}/{}/{}", prefix, entity_name, filename)
    }
}

/// Content type for the media extensions the API serves
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ogg") => "audio/ogg",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// S3-compatible store (AWS, MinIO, or GCS interoperability endpoint)
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    config: StorageConfig,
}

impl S3Storage {
    pub fn new(config: StorageConfig) -> Self {
        debug!(bucket = %config.bucket, endpoint = ?config.endpoint, "Initializing storage");

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "poke-etl-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("Storage client initialized for bucket: {}", config.bucket);

        Self { client, config }
    }

    #[cfg(test)]
    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    #[instrument(skip(self, path, sha256), fields(bucket = %self.config.bucket))]
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        sha256: &str,
    ) -> Result<String, UploadError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| UploadError::Store {
                key: key.to_string(),
                message: format!("Failed to open {}: {}", path.display(), e),
            })?;

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .content_type(content_type_for(path))
            .metadata("sha256", sha256)
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::Store {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!("Uploaded s3://{}/{}", self.config.bucket, key);

        Ok(self.config.public_url_for(key))
    }
}

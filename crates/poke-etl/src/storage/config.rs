use serde::{Deserialize, Serialize};
use std::env;

/// Default bucket receiving re-uploaded media.
pub const DEFAULT_BUCKET: &str = "pokemon_api";

/// Default region for the S3 client.
pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Custom endpoint (MinIO, or GCS interoperability `https://storage.googleapis.com`)
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    #[serde(skip_serializing)]
    pub access_key: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub path_style: bool,
    /// Base used to build public object URLs; derived from endpoint/bucket when unset
    pub public_url: Option<String>,
}

impl StorageConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: env::var("S3_ENDPOINT").ok().filter(|v| !v.is_empty()),
            region: env::var("S3_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| DEFAULT_BUCKET.to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_default(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_default(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            public_url: env::var("S3_PUBLIC_URL").ok().filter(|v| !v.is_empty()),
        })
    }

    #[cfg(test)]
    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: DEFAULT_REGION.to_string(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
            public_url: None,
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.access_key.is_empty() && !self.secret_key.is_empty()
    }

    /// Public URL of `key` inside the configured bucket
    pub fn public_url_for(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        match (&self.public_url, &self.endpoint) {
            (Some(base), _) => format!("{}/{}", base.trim_end_matches('/'), key),
            (None, Some(endpoint)) if self.path_style => {
                format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key)
            },
            (None, Some(endpoint)) => {
                let endpoint = endpoint.trim_end_matches('/');
                match endpoint.split_once("://") {
                    Some((scheme, host)) => format!("{}://{}.{}/{}", scheme, self.bucket, host, key),
                    None => format!("{}/{}/{}", endpoint, self.bucket, key),
                }
            },
            (None, None) => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }
}

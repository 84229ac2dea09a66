//! Configuration management
//!
//! Every knob of the pipeline is read from the environment (optionally via a
//! `.env` file) and can be overridden from the command line.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::storage::config::StorageConfig;

// ============================================================================
// Defaults
// ============================================================================

/// Default collection endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://pokeapi.co/api/v2/pokemon";

/// Default number of entities requested from the collection endpoint.
pub const DEFAULT_ENTITY_LIMIT: usize = 1350;

/// Default number of concurrent detail fetches.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 80;

/// Default number of concurrently executing downloads.
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 100;

/// Default number of concurrent form fetches.
pub const DEFAULT_FORM_CONCURRENCY: usize = 20;

/// Default number of entities uploaded in parallel.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 120;

/// Submitted-but-unfinished downloads allowed per download worker.
pub const DEFAULT_IN_FLIGHT_MULTIPLIER: usize = 4;

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default number of connection-level retries.
pub const DEFAULT_TRANSPORT_RETRIES: u32 = 2;

/// Default User-Agent header.
pub const DEFAULT_USER_AGENT: &str = "Pokemon-ETL/1.0";

/// Default local staging directory.
pub const DEFAULT_DOWNLOAD_ROOT: &str = "downloads";

/// Default key prefix inside the bucket.
pub const DEFAULT_UPLOAD_PREFIX: &str = "pokemon";

/// Log an upload progress line every this many files.
pub const DEFAULT_UPLOAD_PROGRESS_INTERVAL: usize = 500;

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Complete configuration of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    pub api: ApiConfig,
    pub pipeline: PipelineConfig,
    pub upload: UploadConfig,
    pub storage: StorageConfig,
    pub database: Option<DatabaseConfig>,
}

/// Upstream REST API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Collection endpoint; details live at `{base_url}/{id}`
    pub base_url: String,
    pub limit: usize,
    pub request_timeout_secs: u64,
    pub transport_retries: u32,
    pub user_agent: String,
}

/// Stage sizing for the fetch/download pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub fetch_concurrency: usize,
    pub download_concurrency: usize,
    pub form_concurrency: usize,
    pub in_flight_multiplier: usize,
    pub download_root: PathBuf,
    pub show_progress: bool,
}

/// Upload phase settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub prefix: String,
    pub concurrency: usize,
    pub progress_interval: usize,
}

/// Relational sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            limit: DEFAULT_ENTITY_LIMIT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            transport_retries: DEFAULT_TRANSPORT_RETRIES,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            form_concurrency: DEFAULT_FORM_CONCURRENCY,
            in_flight_multiplier: DEFAULT_IN_FLIGHT_MULTIPLIER,
            download_root: PathBuf::from(DEFAULT_DOWNLOAD_ROOT),
            show_progress: true,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_UPLOAD_PREFIX.to_string(),
            concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            progress_interval: DEFAULT_UPLOAD_PROGRESS_INTERVAL,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PipelineConfig {
    /// Maximum number of submitted-but-unresolved download tasks
    pub fn in_flight_cap(&self) -> usize {
        self.download_concurrency
            .saturating_mul(self.in_flight_multiplier)
            .max(1)
    }

    /// Largest worker count of any HTTP stage, used to size the connection pool
    pub fn max_stage_workers(&self) -> usize {
        self.fetch_concurrency
            .max(self.download_concurrency)
            .max(self.form_concurrency)
    }
}

impl EtlConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Build configuration from the current process environment
    pub fn from_env() -> anyhow::Result<Self> {
        let api = ApiConfig {
            base_url: env_or("POKE_API_URL", DEFAULT_API_BASE_URL.to_string())?,
            limit: env_or("POKE_LIMIT", DEFAULT_ENTITY_LIMIT)?,
            request_timeout_secs: env_or("POKE_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            transport_retries: env_or("POKE_TRANSPORT_RETRIES", DEFAULT_TRANSPORT_RETRIES)?,
            user_agent: env_or("POKE_USER_AGENT", DEFAULT_USER_AGENT.to_string())?,
        };

        let pipeline = PipelineConfig {
            fetch_concurrency: env_or("POKE_FETCH_WORKERS", DEFAULT_FETCH_CONCURRENCY)?,
            download_concurrency: env_or("POKE_DOWNLOAD_WORKERS", DEFAULT_DOWNLOAD_CONCURRENCY)?,
            form_concurrency: env_or("POKE_FORM_WORKERS", DEFAULT_FORM_CONCURRENCY)?,
            in_flight_multiplier: env_or("POKE_IN_FLIGHT_MULTIPLIER", DEFAULT_IN_FLIGHT_MULTIPLIER)?,
            download_root: env_or("POKE_DOWNLOAD_ROOT", PathBuf::from(DEFAULT_DOWNLOAD_ROOT))?,
            show_progress: env_or("POKE_SHOW_PROGRESS", true)?,
        };

        let upload = UploadConfig {
            prefix: env_or("POKE_UPLOAD_PREFIX", DEFAULT_UPLOAD_PREFIX.to_string())?,
            concurrency: env_or("POKE_UPLOAD_WORKERS", DEFAULT_UPLOAD_CONCURRENCY)?,
            progress_interval: env_or(
                "POKE_UPLOAD_PROGRESS_INTERVAL",
                DEFAULT_UPLOAD_PROGRESS_INTERVAL,
            )?,
        };

        let database = match std::env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => Some(DatabaseConfig {
                url,
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
            }),
            _ => None,
        };

        let config = Self {
            api,
            pipeline,
            upload,
            storage: StorageConfig::from_env()?,
            database,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api.base_url.trim().is_empty() {
            bail!("POKE_API_URL must not be empty");
        }
        if self.api.request_timeout_secs == 0 {
            bail!("POKE_REQUEST_TIMEOUT_SECS must be greater than 0");
        }
        if self.pipeline.fetch_concurrency == 0 {
            bail!("POKE_FETCH_WORKERS must be greater than 0");
        }
        if self.pipeline.download_concurrency == 0 {
            bail!("POKE_DOWNLOAD_WORKERS must be greater than 0");
        }
        if self.pipeline.form_concurrency == 0 {
            bail!("POKE_FORM_WORKERS must be greater than 0");
        }
        if self.pipeline.in_flight_multiplier == 0 {
            bail!("POKE_IN_FLIGHT_MULTIPLIER must be greater than 0");
        }
        if self.pipeline.download_root.as_os_str().is_empty() {
            bail!("POKE_DOWNLOAD_ROOT must not be empty");
        }
        if self.upload.concurrency == 0 {
            bail!("POKE_UPLOAD_WORKERS must be greater than 0");
        }
        Ok(())
    }
}

/// Read and parse `key`, falling back to `default` when unset
fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value '{}' for {}", raw, key)),
        _ => Ok(default),
    }
}

//! Error taxonomy of the pipeline
//!
//! Only [`ListError`] is fatal to a run. The other per-item errors are turned
//! into counters and warnings at the stage boundary that produced them.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// The collection listing could not be obtained
#[derive(Error, Debug)]
pub enum ListError {
    #[error("List request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("List response from {url} is not valid JSON: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("List response from {url} has no `results` array")]
    MissingResults { url: String },
}

/// A detail or form document could not be fetched or decoded
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Document at {url} could not be decoded: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub(crate) fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = source.status() {
            Self::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            Self::Request {
                url: url.to_string(),
                source,
            }
        }
    }
}

/// A single media item could not be staged locally
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Download of {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Download of {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Writing {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single staged file could not be uploaded
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Reading {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checksum of {path} failed: {message}")]
    Checksum { path: PathBuf, message: String },

    #[error("Upload of {key} failed: {message}")]
    Store { key: String, message: String },
}

/// Top-level error of a run
#[derive(Error, Debug)]
pub enum EtlError {
    #[error(transparent)]
    List(#[from] ListError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

//! Poke ETL Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Fetches catalog records and their media from the PokeAPI, stages the media
//! locally and re-uploads it to object storage.
//!
//! # Stages
//!
//! - **List**: [`api::PokeApiClient::list`] returns the entities to process
//! - **Fetch**: detail and form documents, media found by [`extract::extract`]
//! - **Download**: [`download::MediaDownloader`], deduplicated by [`dedup::SeenSet`]
//! - **Coordinate**: [`pipeline::Pipeline`] sizes every stage and drains them in order
//! - **Upload**: [`upload::MediaUploader`] over any [`storage::ObjectStore`]
//! - **Persist**: `sink::PgRecordSink` (feature `database`)
//!
//! # Example
//!
//! ```no_run
//! use poke_etl::config::EtlConfig;
//! use poke_etl::pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EtlConfig::load()?;
//!     let report = Pipeline::from_config(&config)?.run(config.api.limit).await?;
//!     println!("{} entities fetched", report.records.len());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod dedup;
pub mod download;
pub mod error;
pub mod extract;
pub mod http;
pub mod pipeline;
pub mod progress;
#[cfg(feature = "database")]
pub mod sink;
pub mod storage;
pub mod upload;

pub use error::{EtlError, Result};

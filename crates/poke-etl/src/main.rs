//! Poke ETL - catalog and media pipeline

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use poke_common::logging::{init_logging, LogConfig, LogLevel};
use poke_etl::config::EtlConfig;
use poke_etl::pipeline::{Pipeline, PipelineReport};
use poke_etl::storage::S3Storage;
use poke_etl::upload::{staged_entities, MediaUploader, UploadReport};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "poke-etl")]
#[command(author, version, about = "Pokemon catalog and media ETL")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List, fetch, download, upload and persist
    Run {
        #[command(flatten)]
        stages: StageArgs,

        #[command(flatten)]
        upload: UploadArgs,

        /// Stop after the download phase
        #[arg(long)]
        skip_upload: bool,

        /// Do not write records to the database
        #[arg(long)]
        skip_db: bool,
    },

    /// List, fetch and download only
    Download {
        #[command(flatten)]
        stages: StageArgs,
    },

    /// Upload whatever is staged under the download root
    Upload {
        #[command(flatten)]
        upload: UploadArgs,

        /// Local staging directory
        #[arg(long)]
        download_root: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct StageArgs {
    /// Number of entities to list
    #[arg(short, long)]
    limit: Option<usize>,

    /// Process these ids instead of listing (comma separated)
    #[arg(long, value_delimiter = ',')]
    ids: Vec<i64>,

    /// Concurrent detail fetches
    #[arg(long)]
    fetch_workers: Option<usize>,

    /// Concurrent downloads
    #[arg(long)]
    download_workers: Option<usize>,

    /// Concurrent form fetches
    #[arg(long)]
    form_workers: Option<usize>,

    /// In-flight downloads allowed per download worker
    #[arg(long)]
    in_flight_multiplier: Option<usize>,

    /// Local staging directory
    #[arg(long)]
    download_root: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args, Debug, Clone, Default)]
struct UploadArgs {
    /// Entities uploaded in parallel
    #[arg(long)]
    upload_workers: Option<usize>,

    /// Key prefix inside the bucket
    #[arg(long)]
    prefix: Option<String>,
}

impl StageArgs {
    fn apply(&self, config: &mut EtlConfig) {
        if let Some(limit) = self.limit {
            config.api.limit = limit;
        }
        if let Some(n) = self.fetch_workers {
            config.pipeline.fetch_concurrency = n;
        }
        if let Some(n) = self.download_workers {
            config.pipeline.download_concurrency = n;
        }
        if let Some(n) = self.form_workers {
            config.pipeline.form_concurrency = n;
        }
        if let Some(n) = self.in_flight_multiplier {
            config.pipeline.in_flight_multiplier = n;
        }
        if let Some(root) = &self.download_root {
            config.pipeline.download_root = root.clone();
        }
        if self.no_progress {
            config.pipeline.show_progress = false;
        }
    }
}

impl UploadArgs {
    fn apply(&self, config: &mut EtlConfig) {
        if let Some(n) = self.upload_workers {
            config.upload.concurrency = n;
        }
        if let Some(prefix) = &self.prefix {
            config.upload.prefix = prefix.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("poke-etl")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = EtlConfig::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            stages,
            upload,
            skip_upload,
            skip_db,
        } => {
            stages.apply(&mut config);
            upload.apply(&mut config);
            config.validate()?;

            let report = fetch_phase(&config, &stages.ids).await?;
            log_report("pipeline", &report);

            let uploaded = if skip_upload {
                info!("Upload phase skipped");
                UploadReport::default()
            } else if !config.storage.has_credentials() {
                warn!("No object storage credentials configured, skipping upload phase");
                UploadReport::default()
            } else {
                let report = upload_phase(&config, &report.entity_names()).await;
                log_report("upload", &report);
                report
            };

            if skip_db {
                info!("Persistence skipped");
            } else {
                persist(&config, &report, &uploaded).await;
            }
        },
        Command::Download { stages } => {
            stages.apply(&mut config);
            config.validate()?;

            let report = fetch_phase(&config, &stages.ids).await?;
            log_report("pipeline", &report);
        },
        Command::Upload {
            upload,
            download_root,
        } => {
            upload.apply(&mut config);
            if let Some(root) = download_root {
                config.pipeline.download_root = root;
            }
            config.validate()?;

            if !config.storage.has_credentials() {
                bail!("S3_ACCESS_KEY and S3_SECRET_KEY must be set to upload");
            }

            let entities = staged_entities(&config.pipeline.download_root)
                .await
                .with_context(|| {
                    format!(
                        "Failed to read download root {}",
                        config.pipeline.download_root.display()
                    )
                })?;
            let report = upload_phase(&config, &entities).await;
            log_report("upload", &report);
        },
    }

    info!("Run complete");
    Ok(())
}

async fn fetch_phase(config: &EtlConfig, ids: &[i64]) -> Result<PipelineReport> {
    let pipeline = Pipeline::from_config(config)?;

    let report = if ids.is_empty() {
        pipeline.run(config.api.limit).await?
    } else {
        let entities = ids.iter().map(|id| pipeline.api().entity_for_id(*id)).collect();
        pipeline.run_entities(entities).await
    };

    Ok(report)
}

async fn upload_phase(config: &EtlConfig, entities: &[String]) -> UploadReport {
    let store = Arc::new(S3Storage::new(config.storage.clone()));
    let uploader = MediaUploader::new(store, config.upload.prefix.clone());
    uploader
        .upload_all(
            Path::new(&config.pipeline.download_root),
            entities,
            config.upload.concurrency,
            config.upload.progress_interval,
        )
        .await
}

#[cfg(feature = "database")]
async fn persist(config: &EtlConfig, report: &PipelineReport, uploaded: &UploadReport) {
    use poke_etl::sink::PgRecordSink;

    let Some(database) = &config.database else {
        info!("DATABASE_URL not set, skipping persistence");
        return;
    };

    let sink = match PgRecordSink::connect(database).await {
        Ok(sink) => sink,
        Err(e) => {
            tracing::error!(error = %e, "Could not connect to database, records not saved");
            return;
        },
    };

    if let Err(e) = sink.save_pokemon(&report.records).await {
        tracing::error!(error = %e, "Failed to save pokemon records");
    }
    if let Err(e) = sink.save_media(&uploaded.urls).await {
        tracing::error!(error = %e, "Failed to save media URLs");
    }
}

#[cfg(not(feature = "database"))]
async fn persist(_config: &EtlConfig, _report: &PipelineReport, _uploaded: &UploadReport) {
    info!("Built without the database feature, skipping persistence");
}

fn log_report<T: serde::Serialize>(phase: &str, report: &T) {
    match serde_json::to_string(report) {
        Ok(json) => info!(phase, summary = %json, "Summary"),
        Err(e) => warn!(phase, error = %e, "Could not serialize summary"),
    }
}

//! Stage coordinator
//!
//! Wires the fetch, form and download stages together:
//!
//! ```text
//! list ──> fetch (buffer_unordered) ──┬──> download stage (in-flight cap)
//!                                     └──> form stage ──> download stage
//! ```
//!
//! Every stage is sized independently. The download stage admits at most
//! `download_concurrency * in_flight_multiplier` submitted-but-unresolved
//! tasks; submitters wait at that point until one resolves. Form tasks are
//! the only stage that spawns further downloads, so drain order is fetch
//! stream, then form tracker, then download tracker.

pub mod counters;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use poke_common::types::{EntityRef, FormRef, MediaRef, Pokemon};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::PokeApiClient;
use crate::config::{EtlConfig, PipelineConfig};
use crate::dedup::SeenSet;
use crate::download::{sanitize_component, MediaDownloader};
use crate::error::{EtlError, Result};
use crate::http::HttpClient;
use crate::progress::count_bar;

pub use counters::{CounterSnapshot, StageCounters};

/// Folder holding an entity's own media.
pub const SPRITES_DIR: &str = "sprites";

/// Folder holding one sub-folder per form.
pub const FORMS_DIR: &str = "forms";

/// Summary of one fetch/download run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub counters: CounterSnapshot,
    /// Records of every entity whose detail fetch succeeded
    pub records: Vec<Pokemon>,
}

impl PipelineReport {
    /// Names of the entities that made it through the fetch stage
    pub fn entity_names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.name.clone()).collect()
    }
}

/// Local folder of an entity below `root`
pub fn entity_dir(root: &Path, entity_name: &str) -> PathBuf {
    root.join(sanitize_component(entity_name))
}

pub struct Pipeline {
    api: PokeApiClient,
    downloader: MediaDownloader,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(api: PokeApiClient, downloader: MediaDownloader, config: PipelineConfig) -> Self {
        Self {
            api,
            downloader,
            config,
        }
    }

    /// Build the pipeline and its shared HTTP session from configuration
    pub fn from_config(config: &EtlConfig) -> Result<Self> {
        let http = HttpClient::new(&config.api, config.pipeline.max_stage_workers())?;
        Ok(Self::new(
            PokeApiClient::new(http.clone(), config.api.base_url.clone()),
            MediaDownloader::new(http),
            config.pipeline.clone(),
        ))
    }

    pub fn api(&self) -> &PokeApiClient {
        &self.api
    }

    /// List `limit` entities and run them through every stage
    ///
    /// A failed listing is the only error that aborts the run.
    pub async fn run(&self, limit: usize) -> Result<PipelineReport> {
        let entities = self.api.list(limit).await.map_err(EtlError::from)?;
        info!(count = entities.len(), "Listed entities");
        Ok(self.run_entities(entities).await)
    }

    /// Run explicit entities through every stage and wait for full drain
    pub async fn run_entities(&self, entities: Vec<EntityRef>) -> PipelineReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            %run_id,
            entities = entities.len(),
            fetch = self.config.fetch_concurrency,
            download = self.config.download_concurrency,
            form = self.config.form_concurrency,
            in_flight_cap = self.config.in_flight_cap(),
            "Starting fetch/download phase"
        );

        let counters = Arc::new(StageCounters::new());
        let downloads = Arc::new(DownloadStage::new(
            self.downloader.clone(),
            &self.config,
            Arc::clone(&counters),
        ));
        let forms = FormStage::new(
            self.api.clone(),
            self.config.form_concurrency,
            Arc::clone(&downloads),
            Arc::clone(&counters),
        );

        let bar = count_bar(
            entities.len() as u64,
            "Fetching entities",
            self.config.show_progress,
        );

        let ctx = FetchContext {
            api: &self.api,
            root: &self.config.download_root,
            downloads: &downloads,
            forms: &forms,
            counters: &counters,
        };

        let records: Vec<Pokemon> = stream::iter(entities)
            .map(|entity| ctx.process_entity(entity))
            .buffer_unordered(self.config.fetch_concurrency)
            .inspect(|_| bar.inc(1))
            .filter_map(|record| async move { record })
            .collect()
            .await;
        bar.finish_and_clear();

        debug!("Fetch stage drained, waiting for form stage");
        forms.drain().await;
        debug!("Form stage drained, waiting for download stage");
        downloads.drain().await;

        let counters = counters.snapshot();
        let elapsed = start.elapsed();

        info!(
            %run_id,
            entities_ok = counters.entities_succeeded,
            entities_failed = counters.entities_failed,
            downloaded = counters.downloads_succeeded,
            cached = counters.downloads_cached,
            download_failed = counters.downloads_failed,
            forms = counters.forms_processed,
            peak_in_flight = counters.peak_in_flight,
            "Fetch/download phase complete in {:.2}s",
            elapsed.as_secs_f64()
        );

        PipelineReport {
            run_id,
            started_at,
            elapsed_secs: elapsed.as_secs_f64(),
            counters,
            records,
        }
    }
}

/// Borrowed state of the fetch stage
struct FetchContext<'a> {
    api: &'a PokeApiClient,
    root: &'a Path,
    downloads: &'a Arc<DownloadStage>,
    forms: &'a FormStage,
    counters: &'a StageCounters,
}

impl FetchContext<'_> {
    async fn process_entity(&self, entity: EntityRef) -> Option<Pokemon> {
        self.counters.entity_attempted();

        let detail = match self.api.fetch_detail(&entity.detail_url).await {
            Ok(detail) => detail,
            Err(e) => {
                warn!(
                    entity_id = entity.id,
                    entity = %entity.name,
                    url = %entity.detail_url,
                    error = %e,
                    "Detail fetch failed, skipping entity"
                );
                self.counters.entity_failed();
                return None;
            },
        };
        self.counters.entity_succeeded();

        let name = detail.record.name.clone();
        let dir = entity_dir(self.root, &name);
        let sprites = dir.join(SPRITES_DIR);

        debug!(
            entity = %name,
            media = detail.media.len(),
            forms = detail.forms.len(),
            "Fetched detail"
        );

        for media in detail.media {
            self.downloads.submit(media, sprites.clone(), name.clone()).await;
        }
        for form in detail.forms {
            self.forms.submit(name.clone(), dir.clone(), form);
        }

        Some(detail.record)
    }
}

/// Download stage with an in-flight cap
///
/// `in_flight` bounds submitted-but-unresolved tasks and is where submitters
/// wait. `workers` bounds tasks that are actually transferring.
pub struct DownloadStage {
    downloader: MediaDownloader,
    seen: SeenSet,
    in_flight: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    tracker: TaskTracker,
    counters: Arc<StageCounters>,
}

impl DownloadStage {
    pub fn new(
        downloader: MediaDownloader,
        config: &PipelineConfig,
        counters: Arc<StageCounters>,
    ) -> Self {
        Self {
            downloader,
            seen: SeenSet::new(),
            in_flight: Arc::new(Semaphore::new(config.in_flight_cap())),
            workers: Arc::new(Semaphore::new(config.download_concurrency.max(1))),
            tracker: TaskTracker::new(),
            counters,
        }
    }

    /// Claim `media.url` and schedule its download
    ///
    /// Returns without scheduling when the URL was already claimed this run.
    /// Otherwise waits until the in-flight count is below the cap.
    pub async fn submit(&self, media: MediaRef, folder: PathBuf, owner: String) {
        if !self.seen.claim(&media.url) {
            debug!(url = %media.url, owner = %owner, "Already claimed, skipping");
            self.counters.dedup_skipped();
            return;
        }
        self.counters.download_claimed();

        let permit = match Arc::clone(&self.in_flight).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                warn!(url = %media.url, error = %e, "Download stage closed, dropping media");
                self.counters.download_finished(false, false);
                return;
            },
        };
        self.counters.submit();

        let downloader = self.downloader.clone();
        let workers = Arc::clone(&self.workers);
        let counters = Arc::clone(&self.counters);

        self.tracker.spawn(async move {
            let result = {
                let _worker = workers.acquire().await;
                downloader.download(&media, &folder, &owner).await
            };
            counters.download_finished(result.succeeded, result.cached);
            counters.resolve();
            drop(permit);
        });
    }

    /// Wait for every submitted download to resolve
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    #[cfg(test)]
    pub fn claimed(&self) -> usize {
        self.seen.len()
    }
}

/// Form stage: one follow-up fetch per form, feeding the download stage
struct FormStage {
    api: PokeApiClient,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    downloads: Arc<DownloadStage>,
    counters: Arc<StageCounters>,
}

impl FormStage {
    fn new(
        api: PokeApiClient,
        concurrency: usize,
        downloads: Arc<DownloadStage>,
        counters: Arc<StageCounters>,
    ) -> Self {
        Self {
            api,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            tracker: TaskTracker::new(),
            downloads,
            counters,
        }
    }

    fn submit(&self, entity_name: String, entity_dir: PathBuf, form: FormRef) {
        let api = self.api.clone();
        let permits = Arc::clone(&self.permits);
        let downloads = Arc::clone(&self.downloads);
        let counters = Arc::clone(&self.counters);

        self.tracker.spawn(async move {
            let _permit = permits.acquire().await;

            let detail = match api.fetch_form(&form).await {
                Ok(detail) => detail,
                Err(e) => {
                    warn!(
                        entity = %entity_name,
                        form = %form.name,
                        url = %form.url,
                        error = %e,
                        "Form fetch failed"
                    );
                    counters.form_failed();
                    return;
                },
            };

            let folder = entity_dir
                .join(FORMS_DIR)
                .join(sanitize_component(&form.name));
            let owner = format!("{}_{}", entity_name, form.name);

            for media in detail.media {
                downloads.submit(media, folder.clone(), owner.clone()).await;
            }
            counters.form_processed();
        });
    }

    async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use std::time::Duration;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn stage(download_concurrency: usize, multiplier: usize) -> (DownloadStage, Arc<StageCounters>) {
        let config = PipelineConfig {
            download_concurrency,
            in_flight_multiplier: multiplier,
            ..PipelineConfig::default()
        };
        let counters = Arc::new(StageCounters::new());
        let downloader = MediaDownloader::new(HttpClient::new(&ApiConfig::default(), 4).unwrap());
        (
            DownloadStage::new(downloader, &config, Arc::clone(&counters)),
            counters,
        )
    }

    #[test]
    fn test_entity_dir() {
        assert_eq!(
            entity_dir(Path::new("downloads"), "mr-mime"),
            PathBuf::from("downloads/mr-mime")
        );
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/media/\d+\.png$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 16])
                    .set_delay(Duration::from_millis(30)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (stage, counters) = stage(2, 2);

        for i in 0..24 {
            let media = MediaRef::new("front_default", format!("{}/media/{}.png", server.uri(), i));
            stage
                .submit(media, dir.path().to_path_buf(), format!("owner{i}"))
                .await;
            assert!(counters.in_flight() <= 4);
        }
        stage.drain().await;

        let snapshot = counters.snapshot();
        assert!(snapshot.peak_in_flight <= 4);
        assert!(snapshot.peak_in_flight >= 1);
        assert_eq!(snapshot.downloads_claimed, 24);
        assert_eq!(snapshot.downloads_succeeded, 24);
        assert_eq!(counters.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_urls_are_submitted_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/shared\.png$"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4]))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (stage, counters) = stage(4, 1);
        let url = format!("{}/shared.png", server.uri());

        for owner in ["bulbasaur", "ivysaur", "venusaur"] {
            stage
                .submit(
                    MediaRef::new("front_default", url.clone()),
                    dir.path().join(owner),
                    owner.to_string(),
                )
                .await;
        }
        stage.drain().await;

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.downloads_claimed, 1);
        assert_eq!(snapshot.dedup_skipped, 2);
        assert_eq!(stage.claimed(), 1);
    }
}

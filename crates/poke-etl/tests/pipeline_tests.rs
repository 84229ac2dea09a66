//! End-to-end tests for the fetch/download pipeline
//!
//! A wiremock server plays both the REST API and the media host:
//! - Listing and per-entity failure isolation
//! - Cross-entity deduplication
//! - Form downloads drained before the run returns
//! - Download in-flight cap
//! - Upload phase over what the pipeline staged

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use poke_etl::api::PokeApiClient;
use poke_etl::config::{ApiConfig, PipelineConfig};
use poke_etl::download::MediaDownloader;
use poke_etl::error::{EtlError, ListError, UploadError};
use poke_etl::http::HttpClient;
use poke_etl::pipeline::Pipeline;
use poke_etl::storage::ObjectStore;
use poke_etl::upload::MediaUploader;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn pipeline(server: &MockServer, root: &Path, timeout_secs: u64, download: usize, multiplier: usize) -> Pipeline {
    let api = ApiConfig {
        base_url: format!("{}/api/v2/pokemon", server.uri()),
        request_timeout_secs: timeout_secs,
        transport_retries: 0,
        ..ApiConfig::default()
    };
    let config = PipelineConfig {
        fetch_concurrency: 4,
        download_concurrency: download,
        form_concurrency: 2,
        in_flight_multiplier: multiplier,
        download_root: root.to_path_buf(),
        show_progress: false,
    };
    let http = HttpClient::new(&api, config.max_stage_workers()).unwrap();
    Pipeline::new(
        PokeApiClient::new(http.clone(), api.base_url.clone()),
        MediaDownloader::new(http),
        config,
    )
}

fn detail(id: i64, name: &str, sprites: Value, forms: Value) -> Value {
    json!({
        "id": id,
        "name": name,
        "base_experience": 64,
        "height": 7,
        "weight": 69,
        "order": id,
        "sprites": sprites,
        "forms": forms
    })
}

async fn mount_json(server: &MockServer, at: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current).unwrap() {
            let entry = entry.unwrap();
            if entry.file_type().unwrap().is_dir() {
                stack.push(entry.path());
            } else {
                found.push(entry.path());
            }
        }
    }
    found.sort();
    found
}

/// Three listed entities, the second one times out, the other two share a sprite
async fn mount_three_entities(server: &MockServer) {
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/api/v2/pokemon"))
        .and(query_param("limit", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 3,
            "results": [
                { "name": "bulbasaur", "url": format!("{base}/api/v2/pokemon/1/") },
                { "name": "ivysaur", "url": format!("{base}/api/v2/pokemon/2/") },
                { "name": "venusaur", "url": format!("{base}/api/v2/pokemon/3/") }
            ]
        })))
        .mount(server)
        .await;

    mount_json(
        server,
        "/api/v2/pokemon/1/",
        detail(
            1,
            "bulbasaur",
            json!({
                "front_default": format!("{base}/media/shared.png"),
                "back_default": format!("{base}/media/1-back.png"),
                "front_shiny": null
            }),
            json!([]),
        ),
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/api/v2/pokemon/2/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(detail(2, "ivysaur", json!({}), json!([])))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(server)
        .await;

    mount_json(
        server,
        "/api/v2/pokemon/3/",
        detail(
            3,
            "venusaur",
            json!({
                "front_default": format!("{base}/media/shared.png"),
                "back_default": format!("{base}/media/3-back.png")
            }),
            json!([]),
        ),
    )
    .await;
}

#[tokio::test]
async fn test_timed_out_entity_is_isolated_and_shared_sprite_downloaded_once() {
    let server = MockServer::start().await;
    mount_three_entities(&server).await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/media/.+\.png$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89u8, b'P', b'N', b'G']))
        .expect(3)
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let report = pipeline(&server, root.path(), 1, 4, 2).run(3).await.unwrap();
    let counters = report.counters;

    assert_eq!(counters.entities_attempted, 3);
    assert_eq!(counters.entities_failed, 1);
    assert_eq!(counters.entities_succeeded, 2);
    assert_eq!(
        counters.entities_attempted,
        counters.entities_succeeded + counters.entities_failed
    );

    assert_eq!(counters.downloads_claimed, 3);
    assert_eq!(counters.downloads_succeeded, 3);
    assert_eq!(counters.downloads_failed, 0);
    assert_eq!(counters.dedup_skipped, 1);

    let mut names = report.entity_names();
    names.sort();
    assert_eq!(names, vec!["bulbasaur".to_string(), "venusaur".to_string()]);

    let files = files_under(root.path());
    assert_eq!(files.len(), 3);
    assert!(files
        .iter()
        .all(|f| f.parent().unwrap().file_name().unwrap() == "sprites"));
    assert!(!root.path().join("ivysaur").exists());
}

#[tokio::test]
async fn test_rerun_hits_local_files() {
    let server = MockServer::start().await;
    mount_three_entities(&server).await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/media/.+\.png$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
        .expect(3)
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let pipeline = pipeline(&server, root.path(), 1, 4, 2);

    let first = pipeline.run(3).await.unwrap();
    assert_eq!(first.counters.downloads_succeeded, 3);

    // Each run has its own claim set; the second one is served from disk
    let second = pipeline.run(3).await.unwrap();
    assert_eq!(second.counters.downloads_claimed, 3);
    assert_eq!(second.counters.downloads_cached, 3);
    assert_eq!(second.counters.downloads_succeeded, 0);
}

#[tokio::test]
async fn test_form_downloads_complete_before_run_returns() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_json(
        &server,
        "/api/v2/pokemon/25",
        detail(
            25,
            "pikachu",
            json!({ "front_default": format!("{base}/media/25.png") }),
            json!([
                { "name": "pikachu-rock-star", "url": format!("{base}/api/v2/pokemon-form/10080") },
                { "name": "pikachu-broken", "url": format!("{base}/api/v2/pokemon-form/99999") }
            ]),
        ),
    )
    .await;

    mount_json(
        &server,
        "/api/v2/pokemon-form/10080",
        json!({
            "name": "pikachu-rock-star",
            "sprites": {
                "front_default": format!("{base}/media/forms/10080.png"),
                "back_default": format!("{base}/media/forms/10080-back.png")
            }
        }),
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/api/v2/pokemon-form/99999"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/media/.+\.png$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![9u8; 8])
                .set_delay(Duration::from_millis(100)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let pipeline = pipeline(&server, root.path(), 5, 2, 1);
    let entity = pipeline.api().entity_for_id(25);
    let report = pipeline.run_entities(vec![entity]).await;

    assert_eq!(report.counters.forms_processed, 1);
    assert_eq!(report.counters.forms_failed, 1);
    assert_eq!(report.counters.downloads_succeeded, 3);

    let form_dir = root
        .path()
        .join("pikachu")
        .join("forms")
        .join("pikachu-rock-star");
    assert!(form_dir
        .join("front_default_pikachu_pikachu-rock-star.png")
        .exists());
    assert!(form_dir
        .join("back_default_pikachu_pikachu-rock-star.png")
        .exists());
    assert!(root
        .path()
        .join("pikachu")
        .join("sprites")
        .join("front_default_pikachu.png")
        .exists());
}

#[tokio::test]
async fn test_in_flight_cap_holds_for_large_entity() {
    let server = MockServer::start().await;
    let base = server.uri();

    let sprites: serde_json::Map<String, Value> = (0..40)
        .map(|i| (format!("frame{i:02}"), json!(format!("{base}/media/{i}.png"))))
        .collect();

    mount_json(
        &server,
        "/api/v2/pokemon/132",
        detail(132, "ditto", Value::Object(sprites), json!([])),
    )
    .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/media/\d+\.png$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; 32])
                .set_delay(Duration::from_millis(20)),
        )
        .expect(40)
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    // cap = 2 workers * 3
    let pipeline = pipeline(&server, root.path(), 5, 2, 3);
    let entity = pipeline.api().entity_for_id(132);
    let report = pipeline.run_entities(vec![entity]).await;

    assert_eq!(report.counters.downloads_succeeded, 40);
    assert!(report.counters.peak_in_flight <= 6);
    assert!(report.counters.peak_in_flight >= 1);
}

#[tokio::test]
async fn test_unreadable_listing_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/pokemon"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let err = pipeline(&server, root.path(), 1, 1, 1).run(10).await.unwrap_err();
    assert!(matches!(err, EtlError::List(ListError::Request { .. })));
}

/// Keeps every uploaded key and digest in memory
#[derive(Default)]
struct MemoryStore {
    keys: Mutex<Vec<String>>,
    digests: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        sha256: &str,
    ) -> Result<String, UploadError> {
        tokio::fs::metadata(path)
            .await
            .map_err(|source| UploadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        self.keys.lock().unwrap().push(key.to_string());
        self.digests.lock().unwrap().push(sha256.to_string());
        Ok(format!("https://storage.example/pokemon_api/{key}"))
    }
}

#[tokio::test]
async fn test_upload_phase_consumes_staged_entities() {
    let server = MockServer::start().await;
    mount_three_entities(&server).await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/media/.+\.png$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![5u8; 5]))
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let report = pipeline(&server, root.path(), 1, 4, 2).run(3).await.unwrap();

    let store = Arc::new(MemoryStore::default());
    let uploader = MediaUploader::new(store.clone(), "pokemon");
    let uploaded = uploader
        .upload_all(root.path(), &report.entity_names(), 2, 1)
        .await;

    assert_eq!(uploaded.uploaded, 3);
    assert_eq!(uploaded.failed, 0);
    assert_eq!(uploaded.urls.len(), 3);
    assert!(files_under(root.path()).is_empty());
    assert!(!root.path().join("bulbasaur").exists());

    let keys = store.keys.lock().unwrap().clone();
    assert!(keys.iter().all(|k| k.starts_with("pokemon/")));
    assert!(keys
        .iter()
        .any(|k| k.starts_with("pokemon/venusaur/back_default_venusaur")));

    // Every staged file holds the same five bytes
    let digests = store.digests.lock().unwrap().clone();
    assert_eq!(digests.len(), 3);
    assert!(digests.iter().all(|d| d.len() == 64 && *d == digests[0]));
}

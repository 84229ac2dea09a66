//! Media downloader
//!
//! Stages one media URL into a deterministic local file:
//!
//! - the filename is `{label}_{owner}.{ext}`, so re-runs hit the same path
//! - an existing file short-circuits without any network traffic
//! - bytes stream into a hidden `.part` sibling that is renamed into place
//!   only after the whole body was written, so a visible file is always complete

use std::path::{Path, PathBuf};

use futures::StreamExt;
use poke_common::types::{url_extension, MediaRef};
use serde::Serialize;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DownloadError;
use crate::http::HttpClient;

/// Extension used when the URL does not carry one.
pub const DEFAULT_EXTENSION: &str = "png";

/// Suffix of in-progress staging files.
pub const PARTIAL_SUFFIX: &str = "part";

/// Outcome of one download as seen by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadResult {
    /// Final path; absent on any failure
    pub local_path: Option<PathBuf>,
    pub succeeded: bool,
    /// True when the file already existed and no request was made
    pub cached: bool,
}

/// Successful download variants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Downloaded {
    Cached(PathBuf),
    Fetched { path: PathBuf, bytes: u64 },
}

impl Downloaded {
    pub fn path(&self) -> &Path {
        match self {
            Downloaded::Cached(path) => path,
            Downloaded::Fetched { path, .. } => path,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MediaDownloader {
    http: HttpClient,
}

impl MediaDownloader {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Deterministic destination of `media` inside `folder`
    pub fn target_path(folder: &Path, media: &MediaRef, owner: &str) -> PathBuf {
        let extension = url_extension(&media.url).unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        folder.join(format!(
            "{}_{}.{}",
            sanitize_component(&media.label),
            sanitize_component(owner),
            extension
        ))
    }

    /// Download `media` into `folder`, never failing the caller
    pub async fn download(&self, media: &MediaRef, folder: &Path, owner: &str) -> DownloadResult {
        match self.try_download(media, folder, owner).await {
            Ok(Downloaded::Cached(path)) => DownloadResult {
                local_path: Some(path),
                succeeded: true,
                cached: true,
            },
            Ok(Downloaded::Fetched { path, .. }) => DownloadResult {
                local_path: Some(path),
                succeeded: true,
                cached: false,
            },
            Err(e) => {
                warn!(owner = %owner, url = %media.url, error = %e, "Download failed");
                DownloadResult {
                    local_path: None,
                    succeeded: false,
                    cached: false,
                }
            },
        }
    }

    pub async fn try_download(
        &self,
        media: &MediaRef,
        folder: &Path,
        owner: &str,
    ) -> Result<Downloaded, DownloadError> {
        let path = Self::target_path(folder, media, owner);

        if fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "Already staged, skipping download");
            return Ok(Downloaded::Cached(path));
        }

        let response = self
            .http
            .get(&media.url)
            .await
            .map_err(|source| DownloadError::Request {
                url: media.url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: media.url.clone(),
                status: status.as_u16(),
            });
        }

        fs::create_dir_all(folder)
            .await
            .map_err(|source| DownloadError::Io {
                path: folder.to_path_buf(),
                source,
            })?;

        let staging = staging_path(&path);
        let written = match write_body(response, &media.url, &staging).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_file(&staging).await;
                return Err(e);
            },
        };

        if let Err(source) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(DownloadError::Io { path, source });
        }

        debug!(path = %path.display(), bytes = written, "Downloaded");
        Ok(Downloaded::Fetched {
            path,
            bytes: written,
        })
    }
}

/// Stream the response body into `staging`, returning the byte count
async fn write_body(
    response: reqwest::Response,
    url: &str,
    staging: &Path,
) -> Result<u64, DownloadError> {
    let io_err = |source| DownloadError::Io {
        path: staging.to_path_buf(),
        source,
    };

    let mut file = File::create(staging).await.map_err(io_err)?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| DownloadError::Request {
            url: url.to_string(),
            source,
        })?;
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(io_err)?;
    Ok(written)
}

fn staging_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(
        ".{}.{}.{}",
        file_name,
        Uuid::new_v4().simple(),
        PARTIAL_SUFFIX
    ))
}

/// Replace anything that is not safe inside a single path component
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();

    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn downloader() -> MediaDownloader {
        MediaDownloader::new(HttpClient::new(&ApiConfig::default(), 4).unwrap())
    }

    fn visible_entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_target_path() {
        let folder = Path::new("/tmp/downloads/pikachu/sprites");
        let media = MediaRef::new("other_official-artwork_front_default", "https://a/b/25.png");
        assert_eq!(
            MediaDownloader::target_path(folder, &media, "pikachu"),
            folder.join("other_official-artwork_front_default_pikachu.png")
        );

        let media = MediaRef::new("front_default", "https://a/b/25.gif?raw=1");
        assert_eq!(
            MediaDownloader::target_path(folder, &media, "pikachu_pikachu-rock-star"),
            folder.join("front_default_pikachu_pikachu-rock-star.gif")
        );

        let media = MediaRef::new("sprite", "https://a/b/no-extension");
        assert_eq!(
            MediaDownloader::target_path(folder, &media, "mr. mime"),
            folder.join("sprite_mr--mime.png")
        );
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("front_default"), "front_default");
        assert_eq!(sanitize_component("../etc/passwd"), "-etc-passwd");
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component("farfetch’d"), "farfetch-d");
    }

    #[tokio::test]
    async fn test_second_download_is_a_cache_hit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sprites/1.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4]))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("bulbasaur").join("sprites");
        let media = MediaRef::new("front_default", format!("{}/sprites/1.png", server.uri()));
        let downloader = downloader();

        let first = downloader.download(&media, &folder, "bulbasaur").await;
        let second = downloader.download(&media, &folder, "bulbasaur").await;

        assert!(first.succeeded && !first.cached);
        assert!(second.succeeded && second.cached);
        assert_eq!(first.local_path, second.local_path);

        let path = first.local_path.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![1u8, 2, 3, 4]);
        assert_eq!(visible_entries(&folder), vec!["front_default_bulbasaur.png".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_download_leaves_nothing_behind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sprites/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("missingno").join("sprites");
        let media = MediaRef::new("front_default", format!("{}/sprites/missing.png", server.uri()));

        let result = downloader().download(&media, &folder, "missingno").await;
        assert_eq!(
            result,
            DownloadResult {
                local_path: None,
                succeeded: false,
                cached: false
            }
        );
        assert!(visible_entries(&folder).is_empty());

        let err = downloader().try_download(&media, &folder, "missingno").await.unwrap_err();
        assert!(matches!(err, DownloadError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_existing_file_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let media = MediaRef::new("front_default", format!("{}/sprites/4.png", server.uri()));
        let path = MediaDownloader::target_path(dir.path(), &media, "charmander");
        std::fs::write(&path, b"staged earlier").unwrap();

        let outcome = downloader().try_download(&media, dir.path(), "charmander").await.unwrap();
        assert_eq!(outcome, Downloaded::Cached(path));
    }
}

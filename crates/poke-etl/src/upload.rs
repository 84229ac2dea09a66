//! Uploader: moves staged folders into object storage
//!
//! Each regular file directly inside a folder is uploaded to
//! `{prefix}/{entity_name}/{filename}`, with its SHA-256 attached, and
//! deleted locally once the store accepted it. A folder left empty is removed. Per-file failures keep the
//! local copy for a later pass and never abort the folder.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use poke_common::checksum::compute_file_checksum;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::download::{sanitize_component, PARTIAL_SUFFIX};
use crate::error::UploadError;
use crate::pipeline::{entity_dir, FORMS_DIR, SPRITES_DIR};
use crate::storage::{build_key, ObjectStore};

/// Outcome of uploading one folder
#[derive(Debug, Default)]
pub struct FolderUpload {
    pub urls: Vec<String>,
    pub errors: Vec<UploadError>,
    pub folder_removed: bool,
}

/// One uploaded object, keyed by the entity it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedMedia {
    pub name: String,
    pub url: String,
}

/// Summary of an upload phase
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    pub folders: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub elapsed_secs: f64,
    pub urls: Vec<UploadedMedia>,
}

#[derive(Clone)]
pub struct MediaUploader {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl MediaUploader {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Upload `folder` and return the public URLs of what was uploaded
    ///
    /// A missing folder yields an empty list.
    pub async fn upload(&self, folder: &Path, entity_name: &str) -> Vec<String> {
        self.upload_folder(folder, entity_name).await.urls
    }

    pub async fn upload_folder(&self, folder: &Path, entity_name: &str) -> FolderUpload {
        let mut outcome = FolderUpload::default();

        let files = match list_files(folder).await {
            Ok(files) => files,
            Err(e) => {
                debug!(folder = %folder.display(), error = %e, "Nothing to upload");
                return outcome;
            },
        };

        for path in files {
            match self.upload_file(&path, entity_name).await {
                Ok(url) => {
                    outcome.urls.push(url);
                    if let Err(e) = fs::remove_file(&path).await {
                        warn!(path = %path.display(), error = %e, "Uploaded but could not delete local file");
                    }
                },
                Err(e) => {
                    warn!(entity = %entity_name, path = %path.display(), error = %e, "Upload failed, keeping local file");
                    outcome.errors.push(e);
                },
            }
        }

        outcome.folder_removed = remove_if_empty(folder).await;
        outcome
    }

    async fn upload_file(&self, path: &Path, entity_name: &str) -> Result<String, UploadError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let key = build_key(&self.prefix, &sanitize_component(entity_name), &filename);

        let owned = path.to_path_buf();
        let sha256 = tokio::task::spawn_blocking(move || compute_file_checksum(&owned))
            .await
            .map_err(|e| UploadError::Checksum {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
            .map_err(|e| UploadError::Checksum {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let url = self.store.put_file(&key, path, &sha256).await?;
        debug!(key = %key, sha256 = %sha256, "Uploaded");
        Ok(url)
    }

    /// Upload phase over every listed entity
    ///
    /// For each entity, uploads `sprites/` and every `forms/{form}/` folder,
    /// then prunes directories left empty.
    pub async fn upload_all(
        &self,
        root: &Path,
        entity_names: &[String],
        concurrency: usize,
        progress_interval: usize,
    ) -> UploadReport {
        let start = Instant::now();
        let done = AtomicUsize::new(0);
        let done = &done;

        info!(
            entities = entity_names.len(),
            concurrency, "Starting upload phase"
        );

        let per_entity: Vec<(usize, Vec<FolderUpload>, String)> = stream::iter(entity_names)
            .map(|name| async move {
                let dir = entity_dir(root, name);
                let folders = entity_folders(&dir).await;
                let mut uploads = Vec::with_capacity(folders.len());

                for folder in &folders {
                    let upload = self.upload_folder(folder, name).await;
                    report_progress(done, upload.urls.len(), progress_interval);
                    uploads.push(upload);
                }

                remove_if_empty(&dir.join(FORMS_DIR)).await;
                remove_if_empty(&dir).await;
                (folders.len(), uploads, name.clone())
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut report = UploadReport::default();
        for (folders, uploads, name) in per_entity {
            report.folders += folders;
            for upload in uploads {
                report.failed += upload.errors.len();
                report.uploaded += upload.urls.len();
                report.urls.extend(upload.urls.into_iter().map(|url| UploadedMedia {
                    name: name.clone(),
                    url,
                }));
            }
        }
        report.elapsed_secs = start.elapsed().as_secs_f64();

        info!(
            folders = report.folders,
            uploaded = report.uploaded,
            failed = report.failed,
            "Upload phase complete in {:.2}s",
            report.elapsed_secs
        );

        report
    }
}

/// Names of the entity folders currently staged under `root`
pub async fn staged_entities(root: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Folders of one entity that hold uploadable files
async fn entity_folders(dir: &Path) -> Vec<PathBuf> {
    let mut folders = vec![dir.join(SPRITES_DIR)];

    if let Ok(mut entries) = fs::read_dir(dir.join(FORMS_DIR)).await {
        let mut forms = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                forms.push(entry.path());
            }
        }
        forms.sort();
        folders.extend(forms);
    }

    folders
}

/// Regular, fully written files directly inside `folder`
async fn list_files(folder: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = fs::read_dir(folder).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(PARTIAL_SUFFIX) {
            continue;
        }
        files.push(path);
    }

    files.sort();
    Ok(files)
}

async fn remove_if_empty(dir: &Path) -> bool {
    let is_empty = match fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => return false,
    };
    if !is_empty {
        return false;
    }

    match fs::remove_dir(dir).await {
        Ok(()) => true,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Could not remove empty folder");
            false
        },
    }
}

fn report_progress(done: &AtomicUsize, uploaded: usize, interval: usize) {
    if uploaded == 0 || interval == 0 {
        return;
    }
    let before = done.fetch_add(uploaded, Ordering::Relaxed);
    let after = before + uploaded;
    if after / interval > before / interval {
        info!(uploaded = after, "Upload progress");
    }
}

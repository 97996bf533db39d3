//! src/services/pipeline.rs
//!
//! The QR image stage: validates an event, downloads existing images, renders
//! the missing ones, zips everything for the batch, uploads the archive and
//! records the batch status. Every file the event creates lives in a scratch
//! directory that is removed on every exit path.

use crate::{
    errors::{ProcessingError, Stage},
    models::{
        event::{Event, QR_IMAGE_EVENT_ID, WorkItem},
        image_config::ImageConfig,
        status::BatchStatus,
    },
    services::{
        archiver::{ArchiveError, Archiver},
        downloader::{DownloadError, Downloader},
        renderer::{RenderError, RenderJob, Renderer},
        status_recorder::{PROCESS_ID_COLUMN, StatusRecorder},
        storage_service::Uploader,
    },
};
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

/// Why an event was dropped without processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    UnexpectedEid { eid: String },
    NoDialcodes,
}

/// Terminal result of processing one event.
#[derive(Debug)]
pub enum Outcome {
    Skipped(SkipReason),
    /// `url` is `None` when the event carried no process id.
    Succeeded { url: Option<String>, images: usize },
    Failed(ProcessingError),
}

/// Settings fixed for the lifetime of the pipeline.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Parent of every per-event scratch directory.
    pub temp_root: PathBuf,
    /// Process-wide rendering defaults.
    pub image_defaults: ImageConfig,
    /// Passed to the uploader.
    pub overwrite_archives: bool,
    /// Status table the batch outcome is written to.
    pub status_table: String,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    skipped: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub skipped: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            skipped: self.skipped.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct Pipeline {
    downloader: Arc<dyn Downloader>,
    renderer: Arc<dyn Renderer>,
    archiver: Arc<dyn Archiver>,
    uploader: Arc<dyn Uploader>,
    status: Arc<dyn StatusRecorder>,
    settings: PipelineSettings,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        renderer: Arc<dyn Renderer>,
        archiver: Arc<dyn Archiver>,
        uploader: Arc<dyn Uploader>,
        status: Arc<dyn StatusRecorder>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            downloader,
            renderer,
            archiver,
            uploader,
            status,
            settings,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn temp_root(&self) -> &Path {
        &self.settings.temp_root
    }

    /// Process one event end-to-end. Never retries; the caller owns retry
    /// and offset decisions.
    #[tracing::instrument(
        skip(self, event),
        fields(
            object_id = %event.object_id,
            process_id = event.process_id().unwrap_or(""),
            partition = event.partition,
            offset = event.offset,
        )
    )]
    pub async fn process(&self, event: &Event) -> Outcome {
        if let Err(reason) = validate(event) {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            info!(?reason, "event skipped");
            return Outcome::Skipped(reason);
        }

        let process_id = event.process_id();
        match self.run(event, process_id).await {
            Ok(url) => {
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                info!(url = url.as_deref().unwrap_or(""), "event processed");
                Outcome::Succeeded {
                    url,
                    images: event.dialcodes.len(),
                }
            }
            Err(stage) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(stage = stage.name(), "event failed: {}", stage);
                if let Some(process_id) = process_id {
                    self.record_failure(process_id).await;
                }
                Outcome::Failed(ProcessingError {
                    partition: event.partition,
                    offset: event.offset,
                    object_id: event.object_id.clone(),
                    process_id: process_id.map(str::to_string),
                    stage,
                })
            }
        }
    }

    /// Account for an event the caller gave up on: counts it as failed and
    /// marks its batch failed when it has a process id.
    pub async fn record_timeout(&self, event: &Event) {
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        if let Some(process_id) = event.process_id() {
            self.record_failure(process_id).await;
        }
    }

    /// Best-effort FAILURE write. Errors are logged, never returned.
    async fn record_failure(&self, process_id: &str) {
        if let Err(err) = self
            .status
            .record_status(
                &self.settings.status_table,
                BatchStatus::Failure,
                "",
                PROCESS_ID_COLUMN,
                process_id,
            )
            .await
        {
            error!(process_id, "could not record failure status: {}", err);
        }
    }

    async fn run(&self, event: &Event, process_id: Option<&str>) -> Result<Option<String>, Stage> {
        let scratch = Scratch::create(
            &self.settings.temp_root,
            process_id.unwrap_or(&event.object_id),
        )
        .map_err(Stage::Scratch)?;

        let config = self
            .settings
            .image_defaults
            .resolve(&event.image_config, event.image_format);
        let (with_location, needs_generation) = partition(&event.dialcodes);
        debug!(
            downloads = with_location.len(),
            renders = needs_generation.len(),
            "work items partitioned"
        );

        let mut images = self
            .acquire(&with_location, &config, scratch.path())
            .await?;
        images.extend(
            self.generate(&needs_generation, &config, scratch.path())
                .await?,
        );

        let Some(process_id) = process_id else {
            info!(images = images.len(), "no process id, archive step skipped");
            scratch.close();
            return Ok(None);
        };

        let archive_name = event.archive_name(process_id);
        let archive_path = scratch.path().join(&archive_name);
        self.archive(&archive_path, images, scratch.path()).await?;

        let url = self
            .uploader
            .upload(
                &archive_path,
                &event.storage_container,
                &event.storage_path,
                self.settings.overwrite_archives,
            )
            .await?;

        if let Err(err) = self
            .status
            .record_status(
                &self.settings.status_table,
                BatchStatus::Success,
                &url,
                PROCESS_ID_COLUMN,
                process_id,
            )
            .await
        {
            error!(process_id, url = %url, "could not record success status: {}", err);
        }

        scratch.close();
        Ok(Some(url))
    }

    /// Download every item that already has an image. The first failure
    /// aborts the whole event.
    async fn acquire(
        &self,
        items: &[(&WorkItem, &str)],
        config: &ImageConfig,
        dir: &Path,
    ) -> Result<Vec<String>, Stage> {
        let mut names = Vec::with_capacity(items.len());
        for (item, url) in items {
            let name = item.file_name(config.image_format).ok_or_else(|| {
                DownloadError::InvalidDestination {
                    id: item.id.clone(),
                }
            })?;
            self.downloader.fetch(url, &dir.join(&name)).await?;
            names.push(name);
        }
        Ok(names)
    }

    async fn generate(
        &self,
        items: &[&WorkItem],
        config: &ImageConfig,
        dir: &Path,
    ) -> Result<Vec<String>, Stage> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let jobs = items
            .iter()
            .map(|item| {
                let file_name =
                    item.file_name(config.image_format)
                        .ok_or_else(|| RenderError::InvalidItem {
                            id: item.id.clone(),
                        })?;
                Ok(RenderJob {
                    payload: item.payload().to_string(),
                    label: item.label().to_string(),
                    file_name,
                })
            })
            .collect::<Result<Vec<_>, RenderError>>()?;

        let renderer = Arc::clone(&self.renderer);
        let config = config.clone();
        let dir = dir.to_path_buf();
        let names = tokio::task::spawn_blocking(move || {
            jobs.into_iter()
                .map(|job| {
                    renderer.render(&job, &config, &dir)?;
                    Ok(job.file_name)
                })
                .collect::<Result<Vec<_>, RenderError>>()
        })
        .await
        .map_err(|err| RenderError::Task(err.to_string()))??;

        Ok(names)
    }

    async fn archive(&self, archive_path: &Path, names: Vec<String>, dir: &Path) -> Result<(), Stage> {
        let archiver = Arc::clone(&self.archiver);
        let archive_path = archive_path.to_path_buf();
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || archiver.zip(&archive_path, &names, &dir))
            .await
            .map_err(|err| ArchiveError::Task(err.to_string()))??;
        Ok(())
    }
}

/// An event is processed only if it is a QR image event with work items.
pub fn validate(event: &Event) -> Result<(), SkipReason> {
    if event.eid != QR_IMAGE_EVENT_ID {
        return Err(SkipReason::UnexpectedEid {
            eid: event.eid.clone(),
        });
    }
    if event.dialcodes.is_empty() {
        return Err(SkipReason::NoDialcodes);
    }
    Ok(())
}

/// Split items into those with an existing image URL and those to render,
/// keeping the event order within each group.
pub fn partition(items: &[WorkItem]) -> (Vec<(&WorkItem, &str)>, Vec<&WorkItem>) {
    let mut with_location = Vec::new();
    let mut needs_generation = Vec::new();
    for item in items {
        match item.existing_location() {
            Some(url) => with_location.push((item, url)),
            None => needs_generation.push(item),
        }
    }
    (with_location, needs_generation)
}

/// Per-event scratch directory. Dropping it removes everything inside,
/// including when the processing future is cancelled.
struct Scratch {
    dir: Option<TempDir>,
}

impl Scratch {
    fn create(root: &Path, label: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let prefix: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .take(64)
            .collect();
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", prefix))
            .tempdir_in(root)?;
        Ok(Self { dir: Some(dir) })
    }

    fn path(&self) -> &Path {
        match &self.dir {
            Some(dir) => dir.path(),
            None => Path::new(""),
        }
    }

    fn close(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!(dir = %path.display(), "scratch removed"),
                Err(err) => warn!(dir = %path.display(), "scratch cleanup failed: {}", err),
            }
        }
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, location: Option<&str>) -> WorkItem {
        WorkItem {
            id: id.into(),
            location: location.map(str::to_string),
            ..WorkItem::default()
        }
    }

    #[test]
    fn validate_requires_eid_and_items() {
        let mut event = Event {
            eid: "BE_JOB_REQUEST".into(),
            dialcodes: vec![item("A1", None)],
            ..Event::default()
        };
        assert_eq!(
            validate(&event),
            Err(SkipReason::UnexpectedEid {
                eid: "BE_JOB_REQUEST".into()
            })
        );

        event.eid = QR_IMAGE_EVENT_ID.into();
        assert_eq!(validate(&event), Ok(()));

        event.dialcodes.clear();
        assert_eq!(validate(&event), Err(SkipReason::NoDialcodes));
    }

    #[test]
    fn partition_routes_on_location() {
        let items = vec![
            item("A1", None),
            item("B2", Some("https://cdn.test/B2.png")),
            item("C3", Some("  ")),
            item("D4", Some("https://cdn.test/D4.png")),
        ];

        let (with_location, needs_generation) = partition(&items);
        let downloaded: Vec<_> = with_location.iter().map(|(i, u)| (i.id.as_str(), *u)).collect();
        let generated: Vec<_> = needs_generation.iter().map(|i| i.id.as_str()).collect();

        assert_eq!(
            downloaded,
            vec![
                ("B2", "https://cdn.test/B2.png"),
                ("D4", "https://cdn.test/D4.png")
            ]
        );
        assert_eq!(generated, vec!["A1", "C3"]);
    }

    #[test]
    fn scratch_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let scratch = Scratch::create(root.path(), "batch/../1").unwrap();
            std::fs::write(scratch.path().join("x.png"), b"x").unwrap();
            assert!(scratch.path().starts_with(root.path()));
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}

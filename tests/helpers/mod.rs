#![allow(dead_code)]

use async_trait::async_trait;
use dialcode_qr::{
    db,
    models::{
        event::{Event, QR_IMAGE_EVENT_ID, WorkItem},
        image_config::ImageConfig,
        status::BatchStatus,
    },
    services::{
        archiver::ZipArchiver,
        downloader::{DownloadResult, Downloader, HttpDownloader},
        pipeline::{Pipeline, PipelineSettings},
        renderer::QrRenderer,
        status_recorder::{
            DIALCODE_BATCH_TABLE, SqliteStatusStore, StatusError, StatusRecorder, StatusResult,
        },
        storage_service::{StorageError, StorageResult, StorageService, Uploader},
    },
};
use std::{
    collections::BTreeSet,
    fs::File,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;

pub const PUBLIC_BASE_URL: &str = "http://files.test";

/// Status writes observed by [`RecordingStatus`].
pub type StatusLog = Arc<Mutex<Vec<(String, BatchStatus, String)>>>;

/// Records every status write; optionally fails them all.
#[derive(Default)]
pub struct RecordingStatus {
    pub log: StatusLog,
    pub fail: bool,
}

impl RecordingStatus {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn entries(&self) -> Vec<(String, BatchStatus, String)> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusRecorder for RecordingStatus {
    async fn record_status(
        &self,
        table: &str,
        status: BatchStatus,
        url: &str,
        _key_column: &str,
        key_value: &str,
    ) -> StatusResult<()> {
        assert_eq!(table, DIALCODE_BATCH_TABLE);
        self.log
            .lock()
            .unwrap()
            .push((key_value.to_string(), status, url.to_string()));
        if self.fail {
            return Err(StatusError::NotConfirmed {
                table: table.to_string(),
                key_column: "processid".into(),
                key_value: key_value.to_string(),
            });
        }
        Ok(())
    }
}

/// Counts calls and fails every upload.
#[derive(Default)]
pub struct FailingUploader {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Uploader for FailingUploader {
    async fn upload(
        &self,
        _local_file: &Path,
        _container: &str,
        _remote_path: &str,
        _overwrite: bool,
    ) -> StorageResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Io(std::io::Error::other("storage offline")))
    }
}

/// Never finishes a download within any reasonable test deadline.
pub struct StalledDownloader;

#[async_trait]
impl Downloader for StalledDownloader {
    async fn fetch(&self, _url: &str, _dest: &Path) -> DownloadResult<PathBuf> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        unreachable!("download should have been cancelled")
    }
}

pub struct Harness {
    pub temp_root: TempDir,
    pub objects: TempDir,
    pub storage: StorageService,
    pub batches: SqliteStatusStore,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_base_url(PUBLIC_BASE_URL).await
    }

    pub async fn with_base_url(base_url: &str) -> Self {
        let pool = db::connect("sqlite::memory:", 1).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let pool = Arc::new(pool);
        let objects = tempfile::tempdir().unwrap();
        let storage = StorageService::new(pool.clone(), objects.path(), base_url);
        Self {
            temp_root: tempfile::tempdir().unwrap(),
            objects,
            storage,
            batches: SqliteStatusStore::new(pool),
        }
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            temp_root: self.temp_root.path().to_path_buf(),
            image_defaults: ImageConfig::default(),
            overwrite_archives: false,
            status_table: DIALCODE_BATCH_TABLE.to_string(),
        }
    }

    /// Pipeline with real components and the given status recorder.
    pub fn pipeline_with(&self, status: Arc<dyn StatusRecorder>) -> Pipeline {
        self.pipeline_from(
            http_downloader(),
            Arc::new(self.storage.clone()),
            status,
        )
    }

    pub fn pipeline_from(
        &self,
        downloader: Arc<dyn Downloader>,
        uploader: Arc<dyn Uploader>,
        status: Arc<dyn StatusRecorder>,
    ) -> Pipeline {
        Pipeline::new(
            downloader,
            Arc::new(QrRenderer::new(None)),
            Arc::new(ZipArchiver),
            uploader,
            status,
            self.settings(),
        )
    }

    /// Number of entries left under the scratch root.
    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.temp_root.path()).unwrap().count()
    }

    /// Member names of a stored archive.
    pub async fn archive_members(&self, container: &str, key: &str) -> BTreeSet<String> {
        let (_, file) = self.storage.get_object_reader(container, key).await.unwrap();
        let file: File = file.into_std().await;
        let archive = zip::ZipArchive::new(file).unwrap();
        archive.file_names().map(str::to_string).collect()
    }
}

pub fn http_downloader() -> Arc<dyn Downloader> {
    Arc::new(HttpDownloader::new(Duration::from_secs(5)).unwrap())
}

pub fn item(id: &str) -> WorkItem {
    WorkItem {
        id: id.into(),
        ..WorkItem::default()
    }
}

pub fn located(id: &str, url: String) -> WorkItem {
    WorkItem {
        id: id.into(),
        location: Some(url),
        ..WorkItem::default()
    }
}

pub fn event(process_id: &str, dialcodes: Vec<WorkItem>) -> Event {
    Event {
        eid: QR_IMAGE_EVENT_ID.into(),
        process_id: Some(process_id.into()),
        object_id: "do_2131".into(),
        dialcodes,
        storage_container: "dial".into(),
        storage_path: "do_2131/qr".into(),
        partition: 1,
        offset: 77,
        ..Event::default()
    }
}

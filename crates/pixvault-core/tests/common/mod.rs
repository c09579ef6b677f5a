//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use url::Url;

use pixvault_core::config::{Config, StorageBackend};
use pixvault_core::error::StoreError;
use pixvault_core::pipeline::RasterProcessor;
use pixvault_core::source::{FetchError, FetchedResource, Fetcher};
use pixvault_core::store::MemoryStore;
use pixvault_core::types::{
    Fingerprint, ImageId, ImageRecord, JobId, JobKind, JobSnapshot, JobState, NewImage,
    OutcomeEntry,
};
use pixvault_core::{ImportRequest, JobStore, Pixvault, UploadPayload};

/// A small PNG whose bytes depend on `seed`.
pub fn png(seed: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(12, 12, |x, y| Rgb([seed, x as u8 * 10, y as u8 * 10]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

pub fn upload(bytes: &[u8], filename: &str) -> ImportRequest {
    ImportRequest::SingleUpload(UploadPayload {
        data: Some(STANDARD.encode(bytes)),
        filename: Some(filename.to_string()),
        ..UploadPayload::default()
    })
}

/// Write a zip archive with the given entries into `dir`.
pub fn write_zip(dir: &std::path::Path, name: &str, entries: &[(&str, Vec<u8>)]) -> std::path::PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for (entry, data) in entries {
        writer
            .start_file(*entry, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
    path
}

pub fn archive(path: std::path::PathBuf) -> ImportRequest {
    ImportRequest::ArchiveImport { path }
}

pub fn test_config(pool_size: usize) -> Config {
    let mut config = Config::default();
    config.storage.backend = StorageBackend::Memory;
    config.workers.pool_size = pool_size;
    config.pipeline.retry_delay_ms = 1;
    config
}

/// Serves canned responses; unknown URLs are 404.
#[derive(Default)]
pub struct MapFetcher {
    resources: HashMap<String, (String, Vec<u8>)>,
}

impl MapFetcher {
    pub fn with(mut self, url: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        self.resources
            .insert(url.to_string(), (content_type.to_string(), bytes));
        self
    }
}

#[async_trait]
impl Fetcher for MapFetcher {
    async fn fetch(&self, url: &Url, _max_bytes: u64) -> Result<FetchedResource, FetchError> {
        match self.resources.get(url.as_str()) {
            Some((content_type, bytes)) => Ok(FetchedResource {
                url: url.clone(),
                content_type: Some(content_type.clone()),
                bytes: bytes.clone(),
            }),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

/// Memory store whose `create_image` fails with a transient error a fixed
/// number of times before delegating.
pub struct FlakyStore {
    inner: MemoryStore,
    failures_left: AtomicU32,
    pub create_calls: AtomicU32,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(failures),
            create_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn create_job(&self, kind: JobKind, total_hint: Option<u64>) -> Result<JobId, StoreError> {
        self.inner.create_job(kind, total_hint).await
    }

    async fn append_outcome(&self, job: JobId, entry: &OutcomeEntry) -> Result<(), StoreError> {
        self.inner.append_outcome(job, entry).await
    }

    async fn transition_job(&self, job: JobId, state: JobState) -> Result<(), StoreError> {
        self.inner.transition_job(job, state).await
    }

    async fn save_snapshot(&self, snapshot: &JobSnapshot) -> Result<(), StoreError> {
        self.inner.save_snapshot(snapshot).await
    }

    async fn get_job(&self, job: JobId) -> Result<Option<JobSnapshot>, StoreError> {
        self.inner.get_job(job).await
    }

    async fn list_jobs(&self) -> Result<Vec<JobSnapshot>, StoreError> {
        self.inner.list_jobs().await
    }

    async fn outcomes(&self, job: JobId) -> Result<Vec<OutcomeEntry>, StoreError> {
        self.inner.outcomes(job).await
    }

    async fn create_image(&self, image: NewImage) -> Result<ImageRecord, StoreError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.create_image(image).await
    }

    async fn image_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<ImageRecord>, StoreError> {
        self.inner.image_by_fingerprint(fingerprint).await
    }

    async fn get_image(&self, id: ImageId) -> Result<Option<ImageRecord>, StoreError> {
        self.inner.get_image(id).await
    }

    async fn get_thumbnail(&self, id: ImageId) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get_thumbnail(id).await
    }

    async fn fingerprints(&self) -> Result<Vec<(Fingerprint, ImageId)>, StoreError> {
        self.inner.fingerprints().await
    }
}

/// Service over a memory store with an offline fetcher.
pub async fn memory_service(pool_size: usize) -> Pixvault {
    service_with(test_config(pool_size), Arc::new(MemoryStore::new()), MapFetcher::default()).await
}

pub async fn service_with(config: Config, store: Arc<dyn JobStore>, fetcher: MapFetcher) -> Pixvault {
    let processor = Arc::new(RasterProcessor::new(&config));
    Pixvault::with_components(config, store, processor, Arc::new(fetcher))
        .await
        .unwrap()
}

//! Pixvault Core - image-import ingestion pipeline.
//!
//! Pixvault turns import requests (a single upload, a zip archive, or a URL
//! to crawl) into image records. Each request becomes a job; each image
//! candidate inside it becomes a task on a shared, bounded worker pool.
//!
//! # Architecture
//!
//! ```text
//! ImportRequest → Source adapter → [bounded channel] → Worker pool
//!     → Fingerprint → Dedup → Decode/EXIF/phash → Thumbnail → Store
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use pixvault_core::{Config, ImportRequest, Pixvault};
//!
//! #[tokio::main]
//! async fn main() -> pixvault_core::Result<()> {
//!     let pixvault = Pixvault::new(Config::load()?).await?;
//!     let job = pixvault
//!         .submit(ImportRequest::ArchiveImport { path: "photos.zip".into() })
//!         .await?;
//!     let snapshot = pixvault.wait(job).await?;
//!     println!("{}: {} created", snapshot.state, snapshot.succeeded);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dedup;
pub mod error;
pub mod jobs;
pub mod output;
pub mod pipeline;
pub mod source;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, PixvaultError, Result, SourceOpenError, StoreError, TaskError};
pub use jobs::{CancelOutcome, ExecutorStats, JobCoordinator};
pub use output::{OutputFormat, OutputWriter};
pub use source::{ImportRequest, UploadPayload};
pub use store::JobStore;
pub use types::{
    ErrorKind, ErrorSummary, ImageId, ImageRecord, JobId, JobKind, JobSnapshot, JobState,
    MimeType, OutcomeEntry, TaskOutcome,
};

use std::sync::Arc;
use tokio::sync::watch;

use dedup::DedupIndex;
use jobs::{ExecutorOptions, TaskExecutor};
use pipeline::{ImageProcessor, RasterProcessor, Validator};
use source::{ArchiveOpener, Fetcher, HttpFetcher, SourceOpener, ZipOpener};
use store::RetryPolicy;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The ingestion service: owns the store, the worker pool and the job
/// coordinator.
pub struct Pixvault {
    config: Arc<Config>,
    store: Arc<dyn JobStore>,
    coordinator: JobCoordinator,
}

impl Pixvault {
    /// Build a service from configuration, opening the configured store.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let store = store::open_store(&config).await?;
        Self::with_store(config, store).await
    }

    /// Build a service on top of an existing store.
    pub async fn with_store(config: Config, store: Arc<dyn JobStore>) -> Result<Self> {
        let fetcher = HttpFetcher::new(
            &config.import.crawl.user_agent,
            config.limits.fetch_timeout_ms,
        )?;
        let processor = RasterProcessor::new(&config);
        Self::with_components(config, store, Arc::new(processor), Arc::new(fetcher)).await
    }

    /// Build a service with explicit processor and fetcher implementations.
    pub async fn with_components(
        config: Config,
        store: Arc<dyn JobStore>,
        processor: Arc<dyn ImageProcessor>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        tracing::debug!("Initializing pixvault v{}", VERSION);
        let config = Arc::new(config);

        let dedup = Arc::new(DedupIndex::new());
        for (fingerprint, id) in store.fingerprints().await? {
            dedup.insert_committed(fingerprint, id);
        }
        tracing::debug!("Dedup index warmed with {} fingerprints", dedup.len());

        let validator = Validator::new(
            config.limits.clone(),
            &config.import.allowed_mime_types,
        );
        let executor = TaskExecutor::new(
            processor,
            dedup,
            Arc::clone(&store),
            validator,
            ExecutorOptions::from(&*config),
        );

        let archives: Arc<dyn ArchiveOpener> = Arc::new(ZipOpener);
        let opener = SourceOpener::new(Arc::clone(&config), archives, fetcher);
        let coordinator = JobCoordinator::new(
            Arc::clone(&store),
            opener,
            executor,
            RetryPolicy::from(&config.pipeline),
        );

        Ok(Self {
            config,
            store,
            coordinator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &JobCoordinator {
        &self.coordinator
    }

    pub async fn submit(&self, request: ImportRequest) -> Result<JobId> {
        self.coordinator.submit(request).await
    }

    pub async fn status(&self, job: JobId) -> Result<JobSnapshot> {
        self.coordinator.status(job).await
    }

    pub async fn cancel(&self, job: JobId) -> Result<CancelOutcome> {
        self.coordinator.cancel(job).await
    }

    /// Block until the job is terminal.
    pub async fn wait(&self, job: JobId) -> Result<JobSnapshot> {
        self.coordinator.wait(job).await
    }

    pub fn subscribe(&self, job: JobId) -> Option<watch::Receiver<JobSnapshot>> {
        self.coordinator.subscribe(job)
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobSnapshot>> {
        self.coordinator.list().await
    }

    /// Per-item outcome log of a job.
    pub async fn outcomes(&self, job: JobId) -> Result<Vec<OutcomeEntry>> {
        match self.store.outcomes(job).await {
            Err(StoreError::JobNotFound(id)) => Err(PixvaultError::JobNotFound(id)),
            other => Ok(other?),
        }
    }

    pub async fn image(&self, id: ImageId) -> Result<Option<ImageRecord>> {
        Ok(self.store.get_image(id).await?)
    }

    pub async fn thumbnail(&self, id: ImageId) -> Result<Option<Vec<u8>>> {
        Ok(self.store.get_thumbnail(id).await?)
    }

    pub fn executor_stats(&self) -> ExecutorStats {
        self.coordinator.executor_stats()
    }

    /// Cancel running jobs and stop accepting work.
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }
}

//! Persistence of jobs, outcomes and images.
//!
//! The pipeline depends only on the [`JobStore`] trait. Two implementations
//! ship: [`MemoryStore`] for tests and ephemeral runs, and [`DiskStore`],
//! which keeps the same in-memory index and journals every change under a
//! data directory.

mod disk;
mod memory;
pub mod retry;

pub use disk::DiskStore;
pub use memory::MemoryStore;
pub use retry::{with_retry, RetryPolicy};

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, StorageBackend};
use crate::error::StoreError;
use crate::types::{
    Fingerprint, ImageId, ImageRecord, JobId, JobKind, JobSnapshot, JobState, NewImage,
    OutcomeEntry,
};

/// Durable record of jobs and the images they create.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Register a new `Pending` job.
    async fn create_job(&self, kind: JobKind, total_hint: Option<u64>) -> Result<JobId, StoreError>;

    async fn append_outcome(&self, job: JobId, entry: &OutcomeEntry) -> Result<(), StoreError>;

    /// Move a job to `state`; illegal transitions fail with `InvalidTransition`.
    async fn transition_job(&self, job: JobId, state: JobState) -> Result<(), StoreError>;

    /// Replace the stored snapshot (counters, errors, total).
    async fn save_snapshot(&self, snapshot: &JobSnapshot) -> Result<(), StoreError>;

    async fn get_job(&self, job: JobId) -> Result<Option<JobSnapshot>, StoreError>;

    /// All jobs, newest first.
    async fn list_jobs(&self) -> Result<Vec<JobSnapshot>, StoreError>;

    async fn outcomes(&self, job: JobId) -> Result<Vec<OutcomeEntry>, StoreError>;

    /// Persist a new image. Fails with `DuplicateFingerprint` if the
    /// fingerprint is already stored.
    async fn create_image(&self, image: NewImage) -> Result<ImageRecord, StoreError>;

    async fn image_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<ImageRecord>, StoreError>;

    async fn get_image(&self, id: ImageId) -> Result<Option<ImageRecord>, StoreError>;

    /// Encoded thumbnail bytes of a stored image.
    async fn get_thumbnail(&self, id: ImageId) -> Result<Option<Vec<u8>>, StoreError>;

    /// Every stored (fingerprint, image id) pair, used to warm the dedup index.
    async fn fingerprints(&self) -> Result<Vec<(Fingerprint, ImageId)>, StoreError>;
}

/// Build the store selected by `[storage] backend`.
pub async fn open_store(config: &Config) -> Result<Arc<dyn JobStore>, StoreError> {
    match config.storage.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::Disk => {
            let store = DiskStore::open(config.data_dir()).await?;
            Ok(Arc::new(store))
        }
    }
}

//! In-memory job store.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::StoreError;
use crate::types::{
    Fingerprint, ImageId, ImageRecord, JobId, JobKind, JobSnapshot, JobState, NewImage,
    OutcomeEntry,
};

use super::JobStore;

struct StoredJob {
    snapshot: JobSnapshot,
    outcomes: Vec<OutcomeEntry>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, StoredJob>,
    images: HashMap<ImageId, ImageRecord>,
    by_fingerprint: HashMap<Fingerprint, ImageId>,
    thumbnails: HashMap<ImageId, Arc<[u8]>>,
}

/// Job store backed by hash maps behind a lock.
///
/// Also serves as the index of [`DiskStore`](super::DiskStore).
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert_job(&self, snapshot: JobSnapshot, outcomes: Vec<OutcomeEntry>) {
        self.write()
            .jobs
            .insert(snapshot.id, StoredJob { snapshot, outcomes });
    }

    /// Insert a finished record, enforcing fingerprint uniqueness.
    pub(crate) fn insert_image(
        &self,
        record: ImageRecord,
        thumbnail: Option<Arc<[u8]>>,
    ) -> Result<ImageRecord, StoreError> {
        let mut inner = self.write();
        if let Some(existing) = inner.by_fingerprint.get(&record.fingerprint) {
            return Err(StoreError::DuplicateFingerprint {
                existing: *existing,
            });
        }
        inner
            .by_fingerprint
            .insert(record.fingerprint.clone(), record.id);
        if let Some(bytes) = thumbnail {
            inner.thumbnails.insert(record.id, bytes);
        }
        inner.images.insert(record.id, record.clone());
        Ok(record)
    }

    pub(crate) fn existing_image(&self, fingerprint: &Fingerprint) -> Option<ImageId> {
        self.read().by_fingerprint.get(fingerprint).copied()
    }

    pub(crate) fn snapshot(&self, job: JobId) -> Option<JobSnapshot> {
        self.read().jobs.get(&job).map(|j| j.snapshot.clone())
    }

    /// Stored thumbnail bytes, for records whose thumbnail lives in memory.
    pub fn thumbnail(&self, id: ImageId) -> Option<Arc<[u8]>> {
        self.read().thumbnails.get(&id).cloned()
    }

    /// Apply a validated state change and return the updated snapshot.
    pub(crate) fn apply_transition(&self, job: JobId, state: JobState) -> Result<JobSnapshot, StoreError> {
        let mut inner = self.write();
        let stored = inner.jobs.get_mut(&job).ok_or(StoreError::JobNotFound(job))?;
        let from = stored.snapshot.state;
        if from == state {
            return Ok(stored.snapshot.clone());
        }
        if !from.can_transition_to(state) {
            return Err(StoreError::InvalidTransition {
                job,
                from,
                to: state,
            });
        }
        stored.snapshot.state = state;
        stored.snapshot.updated_at = Utc::now();
        Ok(stored.snapshot.clone())
    }

    pub(crate) fn apply_snapshot(&self, snapshot: &JobSnapshot) -> Result<(), StoreError> {
        let mut inner = self.write();
        let stored = inner
            .jobs
            .get_mut(&snapshot.id)
            .ok_or(StoreError::JobNotFound(snapshot.id))?;
        let from = stored.snapshot.state;
        if from != snapshot.state && !from.can_transition_to(snapshot.state) {
            return Err(StoreError::InvalidTransition {
                job: snapshot.id,
                from,
                to: snapshot.state,
            });
        }
        stored.snapshot = snapshot.clone();
        Ok(())
    }

    pub(crate) fn push_outcome(&self, job: JobId, entry: &OutcomeEntry) -> Result<(), StoreError> {
        let mut inner = self.write();
        let stored = inner.jobs.get_mut(&job).ok_or(StoreError::JobNotFound(job))?;
        stored.outcomes.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, kind: JobKind, total_hint: Option<u64>) -> Result<JobId, StoreError> {
        let id = JobId::new();
        self.insert_job(JobSnapshot::new(id, kind, total_hint), Vec::new());
        Ok(id)
    }

    async fn append_outcome(&self, job: JobId, entry: &OutcomeEntry) -> Result<(), StoreError> {
        self.push_outcome(job, entry)
    }

    async fn transition_job(&self, job: JobId, state: JobState) -> Result<(), StoreError> {
        self.apply_transition(job, state).map(|_| ())
    }

    async fn save_snapshot(&self, snapshot: &JobSnapshot) -> Result<(), StoreError> {
        self.apply_snapshot(snapshot)
    }

    async fn get_job(&self, job: JobId) -> Result<Option<JobSnapshot>, StoreError> {
        Ok(self.snapshot(job))
    }

    async fn list_jobs(&self) -> Result<Vec<JobSnapshot>, StoreError> {
        let mut jobs: Vec<JobSnapshot> = self
            .read()
            .jobs
            .values()
            .map(|j| j.snapshot.clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn outcomes(&self, job: JobId) -> Result<Vec<OutcomeEntry>, StoreError> {
        self.read()
            .jobs
            .get(&job)
            .map(|j| j.outcomes.clone())
            .ok_or(StoreError::JobNotFound(job))
    }

    async fn create_image(&self, image: NewImage) -> Result<ImageRecord, StoreError> {
        let thumbnail: Arc<[u8]> = Arc::from(image.thumbnail.as_slice());
        let record = ImageRecord::from_new(&image, String::new());
        let record = ImageRecord {
            thumbnail: format!("memory:{}", record.id),
            ..record
        };
        self.insert_image(record, Some(thumbnail))
    }

    async fn image_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<ImageRecord>, StoreError> {
        let inner = self.read();
        Ok(inner
            .by_fingerprint
            .get(fingerprint)
            .and_then(|id| inner.images.get(id))
            .cloned())
    }

    async fn get_image(&self, id: ImageId) -> Result<Option<ImageRecord>, StoreError> {
        Ok(self.read().images.get(&id).cloned())
    }

    async fn get_thumbnail(&self, id: ImageId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.thumbnail(id).map(|bytes| bytes.to_vec()))
    }

    async fn fingerprints(&self) -> Result<Vec<(Fingerprint, ImageId)>, StoreError> {
        Ok(self
            .read()
            .by_fingerprint
            .iter()
            .map(|(fp, id)| (fp.clone(), *id))
            .collect())
    }
}

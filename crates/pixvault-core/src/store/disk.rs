//! Disk-backed job store.
//!
//! Layout under the data directory:
//!
//! ```text
//! jobs/<job-id>.json             latest snapshot (replaced atomically)
//! jobs/<job-id>.outcomes.jsonl   append-only outcome log
//! images.jsonl                   append-only image records
//! thumbnails/<fingerprint>.webp  thumbnail bytes
//! ```
//!
//! Everything is also kept in a [`MemoryStore`] index, rebuilt on open.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::output::{parse_jsonl, to_jsonl_line};
use crate::pipeline::Validator;
use crate::types::{
    Fingerprint, ImageId, ImageRecord, JobId, JobKind, JobSnapshot, JobState, MimeType, NewImage,
    OutcomeEntry,
};

use super::{JobStore, MemoryStore};

const IMAGES_LOG: &str = "images.jsonl";

pub struct DiskStore {
    root: PathBuf,
    index: MemoryStore,
    /// Serializes every write so files and index change together.
    write_lock: Mutex<()>,
}

impl DiskStore {
    /// Open (or create) a store rooted at `root`.
    ///
    /// Jobs that were still `Pending` or `Running` when the previous process
    /// stopped are marked `Failed`: their driver is gone.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("jobs")).await?;
        tokio::fs::create_dir_all(root.join("thumbnails")).await?;

        let store = Self {
            root,
            index: MemoryStore::new(),
            write_lock: Mutex::new(()),
        };
        store.load_images().await?;
        store.load_jobs().await?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot_path(&self, job: JobId) -> PathBuf {
        self.root.join("jobs").join(format!("{job}.json"))
    }

    fn outcomes_path(&self, job: JobId) -> PathBuf {
        self.root.join("jobs").join(format!("{job}.outcomes.jsonl"))
    }

    async fn load_images(&self) -> Result<(), StoreError> {
        let path = self.root.join(IMAGES_LOG);
        let Some(text) = read_log(&path).await? else {
            return Ok(());
        };
        let records: Vec<ImageRecord> = parse_jsonl(&text)?;
        let count = records.len();
        for record in records {
            if let Err(e) = self.index.insert_image(record, None) {
                tracing::warn!("Skipping image record while loading {:?}: {}", path, e);
            }
        }
        tracing::debug!("Loaded {} image records from {:?}", count, path);
        Ok(())
    }

    async fn load_jobs(&self) -> Result<(), StoreError> {
        let mut dir = tokio::fs::read_dir(self.root.join("jobs")).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let is_snapshot = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".json"));
            if !is_snapshot {
                continue;
            }

            let text = tokio::fs::read_to_string(&path).await?;
            let mut snapshot: JobSnapshot = serde_json::from_str(&text)?;
            let outcomes: Vec<OutcomeEntry> = match read_log(&self.outcomes_path(snapshot.id)).await? {
                Some(text) => parse_jsonl(&text)?,
                None => Vec::new(),
            };

            let interrupted = !snapshot.state.is_terminal();
            if interrupted {
                tracing::warn!(
                    "Job {} was {} when the store was last closed; marking failed",
                    snapshot.id,
                    snapshot.state
                );
                snapshot.state = JobState::Failed;
                snapshot.updated_at = Utc::now();
                self.write_snapshot(&snapshot).await?;
            }
            self.index.insert_job(snapshot, outcomes);
        }
        Ok(())
    }

    /// Replace a snapshot file via write-to-temp and rename.
    async fn write_snapshot(&self, snapshot: &JobSnapshot) -> Result<(), StoreError> {
        let path = self.snapshot_path(snapshot.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn thumbnail_extension(bytes: &[u8]) -> &'static str {
        match Validator::sniff(bytes) {
            Some(MimeType::Webp) => "webp",
            Some(MimeType::Png) => "png",
            Some(MimeType::Jpeg) => "jpg",
            _ => "bin",
        }
    }
}

async fn append_line(path: &Path, line: &[u8]) -> Result<(), StoreError> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let len = file.metadata().await?.len();

    let written = async {
        file.write_all(line).await?;
        file.flush().await
    }
    .await;
    if let Err(e) = written {
        // Cut a partial record so a retried append starts on a fresh line.
        if let Err(trunc) = file.set_len(len).await {
            tracing::error!("Could not roll back partial append to {:?}: {}", path, trunc);
        }
        return Err(e.into());
    }
    Ok(())
}

/// Read an append-only log, cutting a torn final record left by a crash.
async fn read_log(path: &Path) -> Result<Option<String>, StoreError> {
    let Some(mut text) = read_optional(path).await? else {
        return Ok(None);
    };
    if !text.is_empty() && !text.ends_with('\n') {
        let keep = text.rfind('\n').map_or(0, |i| i + 1);
        tracing::warn!(
            "Truncating torn record at the end of {:?} ({} bytes)",
            path,
            text.len() - keep
        );
        let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
        file.set_len(keep as u64).await?;
        text.truncate(keep);
    }
    Ok(Some(text))
}

async fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl JobStore for DiskStore {
    async fn create_job(&self, kind: JobKind, total_hint: Option<u64>) -> Result<JobId, StoreError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = JobSnapshot::new(JobId::new(), kind, total_hint);
        self.write_snapshot(&snapshot).await?;
        let id = snapshot.id;
        self.index.insert_job(snapshot, Vec::new());
        Ok(id)
    }

    async fn append_outcome(&self, job: JobId, entry: &OutcomeEntry) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.index.snapshot(job).is_none() {
            return Err(StoreError::JobNotFound(job));
        }
        append_line(&self.outcomes_path(job), &to_jsonl_line(entry)?).await?;
        self.index.push_outcome(job, entry)
    }

    async fn transition_job(&self, job: JobId, state: JobState) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.index.apply_transition(job, state)?;
        self.write_snapshot(&snapshot).await
    }

    async fn save_snapshot(&self, snapshot: &JobSnapshot) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.index.apply_snapshot(snapshot)?;
        self.write_snapshot(snapshot).await
    }

    async fn get_job(&self, job: JobId) -> Result<Option<JobSnapshot>, StoreError> {
        self.index.get_job(job).await
    }

    async fn list_jobs(&self) -> Result<Vec<JobSnapshot>, StoreError> {
        self.index.list_jobs().await
    }

    async fn outcomes(&self, job: JobId) -> Result<Vec<OutcomeEntry>, StoreError> {
        self.index.outcomes(job).await
    }

    async fn create_image(&self, image: NewImage) -> Result<ImageRecord, StoreError> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.index.existing_image(&image.fingerprint) {
            return Err(StoreError::DuplicateFingerprint { existing });
        }

        let relative = format!(
            "thumbnails/{}.{}",
            image.fingerprint,
            Self::thumbnail_extension(&image.thumbnail)
        );
        tokio::fs::write(self.root.join(&relative), &image.thumbnail).await?;

        let record = ImageRecord::from_new(&image, relative);
        append_line(&self.root.join(IMAGES_LOG), &to_jsonl_line(&record)?).await?;
        self.index.insert_image(record, None)
    }

    async fn image_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<ImageRecord>, StoreError> {
        self.index.image_by_fingerprint(fingerprint).await
    }

    async fn get_image(&self, id: ImageId) -> Result<Option<ImageRecord>, StoreError> {
        self.index.get_image(id).await
    }

    async fn get_thumbnail(&self, id: ImageId) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(record) = self.index.get_image(id).await? else {
            return Ok(None);
        };
        match tokio::fs::read(self.root.join(&record.thumbnail)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn fingerprints(&self) -> Result<Vec<(Fingerprint, ImageId)>, StoreError> {
        self.index.fingerprints().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorKind, TaskOutcome};

    fn new_image(fingerprint: &str, job: JobId) -> NewImage {
        NewImage {
            fingerprint: Fingerprint::from_hex(fingerprint),
            perceptual_hash: Some("phash".into()),
            mime_type: MimeType::Jpeg,
            width: Some(640),
            height: Some(480),
            title: "dunes".to_string(),
            thumbnail: b"RIFF\0\0\0\0WEBPVP8 ".to_vec(),
            exif: None,
            source: "dunes.jpg".to_string(),
            job_id: job,
            file_size: 2048,
        }
    }

    fn outcome(source: &str) -> OutcomeEntry {
        OutcomeEntry {
            source: source.to_string(),
            outcome: TaskOutcome::Failed {
                kind: ErrorKind::Unsupported,
                message: "not an image".into(),
            },
            recorded_at: Utc::now(),
            counted: true,
        }
    }

    #[tokio::test]
    async fn test_create_image_writes_thumbnail_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();

        let record = store.create_image(new_image("abc", JobId::new())).await.unwrap();
        assert_eq!(record.thumbnail, "thumbnails/abc.webp");
        assert!(dir.path().join("thumbnails/abc.webp").is_file());
        assert!(dir.path().join(IMAGES_LOG).is_file());

        let thumb = store.get_thumbnail(record.id).await.unwrap().unwrap();
        assert_eq!(&thumb[..4], b"RIFF");

        let err = store
            .create_image(new_image("abc", JobId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateFingerprint { existing } if existing == record.id));
    }

    #[tokio::test]
    async fn test_reopen_restores_jobs_and_images() {
        let dir = tempfile::tempdir().unwrap();
        let (job, image_id) = {
            let store = DiskStore::open(dir.path()).await.unwrap();
            let job = store.create_job(JobKind::ArchiveImport, None).await.unwrap();
            store.transition_job(job, JobState::Running).await.unwrap();
            store.append_outcome(job, &outcome("notes.txt")).await.unwrap();
            let image = store.create_image(new_image("abc", job)).await.unwrap();

            let mut snap = store.get_job(job).await.unwrap().unwrap();
            snap.total = 2;
            snap.total_final = true;
            snap.state = JobState::CompletedWithErrors;
            store.save_snapshot(&snap).await.unwrap();
            (job, image.id)
        };

        let store = DiskStore::open(dir.path()).await.unwrap();
        let snap = store.get_job(job).await.unwrap().unwrap();
        assert_eq!(snap.state, JobState::CompletedWithErrors);
        assert_eq!(snap.total, 2);
        assert_eq!(store.outcomes(job).await.unwrap().len(), 1);

        let image = store
            .image_by_fingerprint(&Fingerprint::from_hex("abc"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(image.id, image_id);
        assert_eq!(store.fingerprints().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_marks_interrupted_jobs_failed() {
        let dir = tempfile::tempdir().unwrap();
        let job = {
            let store = DiskStore::open(dir.path()).await.unwrap();
            let job = store.create_job(JobKind::UrlCrawl, None).await.unwrap();
            store.transition_job(job, JobState::Running).await.unwrap();
            job
        };

        let store = DiskStore::open(dir.path()).await.unwrap();
        assert_eq!(
            store.get_job(job).await.unwrap().unwrap().state,
            JobState::Failed
        );
    }

    #[tokio::test]
    async fn test_reopen_with_merged_record_in_image_log() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DiskStore::open(dir.path()).await.unwrap();
            store.create_image(new_image("abc", JobId::new())).await.unwrap();
            store.create_image(new_image("def", JobId::new())).await.unwrap();
        }

        // A fragment glued to the front of the first record.
        let log = dir.path().join(IMAGES_LOG);
        let text = std::fs::read_to_string(&log).unwrap();
        std::fs::write(&log, format!("{{\"id\":\"6f1f{text}")).unwrap();

        let store = DiskStore::open(dir.path()).await.unwrap();
        let fingerprints = store.fingerprints().await.unwrap();
        assert_eq!(fingerprints.len(), 1);
        assert_eq!(fingerprints[0].0, Fingerprint::from_hex("def"));
    }

    #[tokio::test]
    async fn test_torn_tail_is_cut_before_next_append() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DiskStore::open(dir.path()).await.unwrap();
            store.create_image(new_image("abc", JobId::new())).await.unwrap();
        }

        let log = dir.path().join(IMAGES_LOG);
        let mut text = std::fs::read_to_string(&log).unwrap();
        text.push_str("{\"id\":\"6f1f");
        std::fs::write(&log, text).unwrap();

        {
            let store = DiskStore::open(dir.path()).await.unwrap();
            assert!(std::fs::read_to_string(&log).unwrap().ends_with('\n'));
            store.create_image(new_image("def", JobId::new())).await.unwrap();
        }

        let store = DiskStore::open(dir.path()).await.unwrap();
        assert_eq!(store.fingerprints().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_append_outcome_unknown_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        let err = store
            .append_outcome(JobId::new(), &outcome("a.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::JobNotFound(_)));
    }

    #[test]
    fn test_thumbnail_extension() {
        assert_eq!(DiskStore::thumbnail_extension(b"RIFF\0\0\0\0WEBP"), "webp");
        assert_eq!(DiskStore::thumbnail_extension(b"\x89PNG\r\n"), "png");
        assert_eq!(DiskStore::thumbnail_extension(b"????"), "bin");
    }
}

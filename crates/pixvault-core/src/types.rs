//! Core data types for the pixvault ingestion pipeline.
//!
//! These types describe jobs, the outcome of each import task, and the image
//! records the pipeline creates. They are what the Jobs API serializes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque identifier of an import job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Opaque identifier of an image record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub Uuid);

impl ImageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ImageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// BLAKE3 content fingerprint (lowercase hex, 64 chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already-computed hex digest.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of import a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    SingleUpload,
    ArchiveImport,
    UrlCrawl,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::SingleUpload => write!(f, "single-upload"),
            JobKind::ArchiveImport => write!(f, "archive-import"),
            JobKind::UrlCrawl => write!(f, "url-crawl"),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed
                | JobState::CompletedWithErrors
                | JobState::Failed
                | JobState::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Transitions are monotonic: terminal states are never left, and a job
    /// only reaches `Running` from `Pending`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        match self {
            JobState::Pending => matches!(
                next,
                JobState::Running | JobState::Failed | JobState::Cancelled
            ),
            JobState::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::CompletedWithErrors => "completed_with_errors",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Client-visible error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The import source itself could not be opened.
    SourceOpen,
    Unsupported,
    Corrupt,
    IoError,
    StorageError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::SourceOpen => "SourceOpen",
            ErrorKind::Unsupported => "Unsupported",
            ErrorKind::Corrupt => "Corrupt",
            ErrorKind::IoError => "IOError",
            ErrorKind::StorageError => "StorageError",
        };
        f.write_str(s)
    }
}

/// Result of running one task through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TaskOutcome {
    Created { image_id: ImageId },
    Duplicate { existing_image_id: ImageId },
    Failed { kind: ErrorKind, message: String },
    Skipped { reason: String },
}

impl TaskOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskOutcome::Failed { .. })
    }
}

/// A task outcome as persisted in a job's outcome log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeEntry {
    /// Filename, archive entry path, or URL the item came from
    pub source: String,

    #[serde(flatten)]
    pub outcome: TaskOutcome,

    pub recorded_at: DateTime<Utc>,

    /// False when the outcome arrived after cancellation was observed
    pub counted: bool,
}

/// Per-item error as shown to clients: kind and offending source only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub kind: ErrorKind,
    pub source: String,
}

/// Point-in-time view of a job, as returned by `GET /jobs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Items known so far; final once `total_final` is set
    pub total: u64,
    pub total_final: bool,

    pub succeeded: u64,
    pub failed: u64,
    /// Duplicates and skipped items
    pub skipped: u64,

    pub errors: Vec<ErrorSummary>,
    pub cancel_requested: bool,
}

impl JobSnapshot {
    /// Fresh `Pending` snapshot.
    pub fn new(id: JobId, kind: JobKind, total_hint: Option<u64>) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            state: JobState::Pending,
            created_at: now,
            updated_at: now,
            total: total_hint.unwrap_or(0),
            total_final: false,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
            cancel_requested: false,
        }
    }

    /// Number of counted outcomes.
    pub fn processed(&self) -> u64 {
        self.succeeded + self.failed + self.skipped
    }
}

/// Allowed image mime types. This set is closed: anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MimeType {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/gif")]
    Gif,
    #[serde(rename = "image/webp")]
    Webp,
    #[serde(rename = "image/bmp")]
    Bmp,
    #[serde(rename = "image/tiff")]
    Tiff,
}

impl MimeType {
    pub const ALL: [MimeType; 6] = [
        MimeType::Jpeg,
        MimeType::Png,
        MimeType::Gif,
        MimeType::Webp,
        MimeType::Bmp,
        MimeType::Tiff,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MimeType::Jpeg => "image/jpeg",
            MimeType::Png => "image/png",
            MimeType::Gif => "image/gif",
            MimeType::Webp => "image/webp",
            MimeType::Bmp => "image/bmp",
            MimeType::Tiff => "image/tiff",
        }
    }

    /// Map a decoder-detected format into the allowed set.
    pub fn from_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(MimeType::Jpeg),
            image::ImageFormat::Png => Some(MimeType::Png),
            image::ImageFormat::Gif => Some(MimeType::Gif),
            image::ImageFormat::WebP => Some(MimeType::Webp),
            image::ImageFormat::Bmp => Some(MimeType::Bmp),
            image::ImageFormat::Tiff => Some(MimeType::Tiff),
            _ => None,
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// EXIF summary extracted from an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExifData {
    /// When the photo was captured (EXIF DateTimeOriginal or DateTime)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_make: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,

    /// GPS latitude (decimal degrees)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_latitude: Option<f64>,

    /// GPS longitude (decimal degrees)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_longitude: Option<f64>,

    /// Image orientation (1-8)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<u32>,
}

/// Fields needed to create an image record.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub fingerprint: Fingerprint,
    pub perceptual_hash: Option<String>,
    pub mime_type: MimeType,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub title: String,
    /// Encoded thumbnail bytes; the store decides where they live
    pub thumbnail: Vec<u8>,
    pub exif: Option<ExifData>,
    pub source: String,
    pub job_id: JobId,
    pub file_size: u64,
}

/// A persisted image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: ImageId,
    pub fingerprint: Fingerprint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perceptual_hash: Option<String>,
    pub mime_type: MimeType,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub title: String,
    /// Reference to the stored thumbnail (path or in-memory key)
    pub thumbnail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exif: Option<ExifData>,
    pub source: String,
    pub job_id: JobId,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    /// Build a record from creation fields and a thumbnail reference.
    pub fn from_new(image: &NewImage, thumbnail: String) -> Self {
        let now = Utc::now();
        Self {
            id: ImageId::new(),
            fingerprint: image.fingerprint.clone(),
            perceptual_hash: image.perceptual_hash.clone(),
            mime_type: image.mime_type,
            width: image.width,
            height: image.height,
            title: image.title.clone(),
            thumbnail,
            exif: image.exif.clone(),
            source: image.source.clone(),
            job_id: image.job_id,
            file_size: image.file_size,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions_are_monotonic() {
        assert!(JobState::Pending.can_transition_to(JobState::Running));
        assert!(JobState::Pending.can_transition_to(JobState::Failed));
        assert!(JobState::Pending.can_transition_to(JobState::Cancelled));
        assert!(!JobState::Pending.can_transition_to(JobState::Completed));
        assert!(JobState::Running.can_transition_to(JobState::CompletedWithErrors));
        assert!(!JobState::Running.can_transition_to(JobState::Pending));

        for terminal in [
            JobState::Completed,
            JobState::CompletedWithErrors,
            JobState::Failed,
            JobState::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            for next in [JobState::Pending, JobState::Running, JobState::Completed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_outcome_entry_serde_shape() {
        let entry = OutcomeEntry {
            source: "beach.jpg".to_string(),
            outcome: TaskOutcome::Failed {
                kind: ErrorKind::Corrupt,
                message: "bad header".to_string(),
            },
            recorded_at: Utc::now(),
            counted: true,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"outcome\":\"failed\""));
        assert!(json.contains("\"kind\":\"Corrupt\""));
        assert!(json.contains("\"recordedAt\""));

        let parsed: OutcomeEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.outcome, entry.outcome);
    }

    #[test]
    fn test_job_kind_wire_names() {
        let kind: JobKind = serde_json::from_str("\"archive-import\"").unwrap();
        assert_eq!(kind, JobKind::ArchiveImport);
        assert_eq!(JobKind::UrlCrawl.to_string(), "url-crawl");
    }

    #[test]
    fn test_mime_type_from_format_is_closed() {
        assert_eq!(
            MimeType::from_format(image::ImageFormat::Png),
            Some(MimeType::Png)
        );
        assert_eq!(MimeType::from_format(image::ImageFormat::Ico), None);
        let json = serde_json::to_string(&MimeType::Webp).unwrap();
        assert_eq!(json, "\"image/webp\"");
    }

    #[test]
    fn test_snapshot_skeleton() {
        let snap = JobSnapshot::new(JobId::new(), JobKind::SingleUpload, Some(1));
        assert_eq!(snap.state, JobState::Pending);
        assert_eq!(snap.total, 1);
        assert!(!snap.total_final);
        assert_eq!(snap.processed(), 0);
    }

    #[test]
    fn test_ids_roundtrip_through_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<ImageId>().is_err());
    }
}

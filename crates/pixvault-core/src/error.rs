//! Error types for the pixvault ingestion pipeline.
//!
//! Errors are organized by scope: `SourceOpenError` is fatal to a whole job,
//! `TaskError` is isolated to one item, and `StoreError` comes from the
//! persistence layer. Each carries the source label it concerns so that the
//! client-facing summary can name the offending item.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{ErrorKind, ImageId, JobId, JobState};

/// Top-level error type for pixvault operations.
#[derive(Error, Debug)]
pub enum PixvaultError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Storage errors
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// The requested job does not exist
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// The worker pool has been shut down
    #[error("Worker pool is shut down")]
    Shutdown,

    /// The HTTP client for URL crawls could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// The import source could not be opened. Fails the whole job.
#[derive(Error, Debug)]
pub enum SourceOpenError {
    #[error("Source not found: {0}")]
    NotFound(PathBuf),

    #[error("Cannot open archive {path}: {message}")]
    Archive { path: PathBuf, message: String },

    #[error("URL unreachable {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("Invalid import request: {0}")]
    InvalidRequest(String),

    #[error("IO error opening {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SourceOpenError {
    /// Label used in the job's single top-level error summary.
    pub fn label(&self) -> String {
        match self {
            SourceOpenError::NotFound(path)
            | SourceOpenError::Archive { path, .. }
            | SourceOpenError::Io { path, .. } => path.display().to_string(),
            SourceOpenError::Unreachable { url, .. } => url.clone(),
            SourceOpenError::InvalidRequest(_) => "request".to_string(),
        }
    }
}

/// Per-item pipeline errors, organized by failure class.
#[derive(Error, Debug)]
pub enum TaskError {
    /// Bytes are in a recognized format but cannot be decoded
    #[error("Corrupt image {source_label}: {message}")]
    Corrupt {
        source_label: String,
        message: String,
    },

    /// Content is not one of the allowed image types
    #[error("Unsupported format for {source_label}: {format}")]
    Unsupported {
        source_label: String,
        format: String,
    },

    /// Item exceeds the configured size limit
    #[error("File too large: {source_label} ({size_mb}MB > {max_mb}MB)")]
    TooLarge {
        source_label: String,
        size_mb: u64,
        max_mb: u64,
    },

    /// Image dimensions exceed the configured limit
    #[error("Image too large: {source_label} ({width}x{height} > {max_dim})")]
    ImageTooLarge {
        source_label: String,
        width: u32,
        height: u32,
        max_dim: u32,
    },

    /// Reading the item's bytes failed
    #[error("IO error for {source_label}: {message}")]
    Io {
        source_label: String,
        message: String,
    },

    /// A stage exceeded its time budget
    #[error("Timeout in {stage} stage for {source_label} after {timeout_ms}ms")]
    Timeout {
        source_label: String,
        stage: String,
        timeout_ms: u64,
    },

    /// Persisting failed after all retries
    #[error("Storage error for {source_label}: {message}")]
    Storage {
        source_label: String,
        message: String,
    },
}

impl TaskError {
    /// Client-visible classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Corrupt { .. } => ErrorKind::Corrupt,
            TaskError::Unsupported { .. }
            | TaskError::TooLarge { .. }
            | TaskError::ImageTooLarge { .. } => ErrorKind::Unsupported,
            TaskError::Io { .. } | TaskError::Timeout { .. } => ErrorKind::IoError,
            TaskError::Storage { .. } => ErrorKind::StorageError,
        }
    }

    /// The item this error concerns.
    pub fn source_label(&self) -> &str {
        match self {
            TaskError::Corrupt { source_label, .. }
            | TaskError::Unsupported { source_label, .. }
            | TaskError::TooLarge { source_label, .. }
            | TaskError::ImageTooLarge { source_label, .. }
            | TaskError::Io { source_label, .. }
            | TaskError::Timeout { source_label, .. }
            | TaskError::Storage { source_label, .. } => source_label,
        }
    }

    pub fn io(source_label: &str, err: impl std::fmt::Display) -> Self {
        TaskError::Io {
            source_label: source_label.to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors surfaced by a `JobStore` implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Storage-level uniqueness backstop for fingerprints
    #[error("Fingerprint already stored as image {existing}")]
    DuplicateFingerprint { existing: ImageId },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Invalid transition for job {job}: {from} -> {to}")]
    InvalidTransition {
        job: JobId,
        from: JobState,
        to: JobState,
    },

    /// Transient backend failure
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether retrying the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

/// Convenience type alias for pixvault results.
pub type Result<T> = std::result::Result<T, PixvaultError>;

/// Convenience type alias for per-task results.
pub type TaskResult<T> = std::result::Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_kinds() {
        let timeout = TaskError::Timeout {
            source_label: "a.jpg".into(),
            stage: "fetch".into(),
            timeout_ms: 100,
        };
        assert_eq!(timeout.kind(), ErrorKind::IoError);

        let too_large = TaskError::TooLarge {
            source_label: "a.jpg".into(),
            size_mb: 200,
            max_mb: 100,
        };
        assert_eq!(too_large.kind(), ErrorKind::Unsupported);
        assert_eq!(TaskError::io("a.jpg", "boom").kind(), ErrorKind::IoError);
    }

    #[test]
    fn test_store_error_retryable() {
        assert!(StoreError::Unavailable("db down".into()).is_retryable());
        assert!(!StoreError::DuplicateFingerprint {
            existing: ImageId::new()
        }
        .is_retryable());
        assert!(!StoreError::JobNotFound(JobId::new()).is_retryable());
    }

    #[test]
    fn test_source_open_label() {
        let err = SourceOpenError::Unreachable {
            url: "https://example.com".into(),
            message: "dns".into(),
        };
        assert_eq!(err.label(), "https://example.com");
        let err = SourceOpenError::NotFound(PathBuf::from("/tmp/missing.zip"));
        assert_eq!(err.label(), "/tmp/missing.zip");
    }
}

//! Sub-configuration structs with their defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::MimeType;

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory for persisted jobs, images and thumbnails
    pub data_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.pixvault/data"),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum number of tasks in flight across all jobs
    pub pool_size: usize,

    /// Time budget for one task, from byte fetch to persist
    pub task_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            task_timeout_ms: 60_000,
        }
    }
}

/// Pipeline settings for backpressure and storage retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Max source items buffered between an adapter and its job
    pub buffer_size: usize,

    /// Total attempts for retryable storage failures
    pub retry_attempts: u32,

    /// Base delay for exponential backoff in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_size: 32,
            retry_attempts: 3,
            retry_delay_ms: 200,
        }
    }
}

/// Resource limits to protect against problematic inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum item size in megabytes
    pub max_file_size_mb: u64,

    /// Maximum image dimension (width or height)
    pub max_image_dimension: u32,

    /// Decode timeout in milliseconds
    pub decode_timeout_ms: u64,

    /// Network fetch timeout in milliseconds
    pub fetch_timeout_ms: u64,
}

impl LimitsConfig {
    pub fn max_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 100,
            max_image_dimension: 10000,
            decode_timeout_ms: 5000,
            fetch_timeout_ms: 15000,
        }
    }
}

/// Thumbnail generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Thumbnail size in pixels (longest edge)
    pub size: u32,

    /// Output format ("webp" or "png")
    pub format: String,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            size: 256,
            format: "webp".to_string(),
        }
    }
}

/// Import settings shared by all source adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Mime types accepted at validation; must be a subset of the closed set
    pub allowed_mime_types: Vec<MimeType>,

    /// URL-crawl settings
    pub crawl: CrawlConfig,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            allowed_mime_types: MimeType::ALL.to_vec(),
            crawl: CrawlConfig::default(),
        }
    }
}

/// URL-crawl settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// HTML pages visited per crawl, including the start page
    pub max_pages: usize,

    /// Image resources emitted per crawl
    pub max_images: usize,

    /// Only follow page links on the start URL's host
    pub same_host_only: bool,

    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 1,
            max_images: 200,
            same_host_only: true,
            user_agent: format!("pixvault/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Disk,
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Disk,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "workers.pool_size must be > 0".into(),
            ));
        }
        if self.workers.task_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "workers.task_timeout_ms must be > 0".into(),
            ));
        }
        if self.pipeline.buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.buffer_size must be > 0".into(),
            ));
        }
        if self.pipeline.retry_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.retry_attempts must be > 0".into(),
            ));
        }
        if self.limits.max_file_size_mb == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_file_size_mb must be > 0".into(),
            ));
        }
        if self.limits.max_image_dimension == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_image_dimension must be > 0".into(),
            ));
        }
        if self.limits.decode_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "limits.decode_timeout_ms must be > 0".into(),
            ));
        }
        if self.limits.fetch_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "limits.fetch_timeout_ms must be > 0".into(),
            ));
        }
        if self.thumbnail.size == 0 {
            return Err(ConfigError::ValidationError(
                "thumbnail.size must be > 0".into(),
            ));
        }
        if !matches!(self.thumbnail.format.as_str(), "webp" | "png") {
            return Err(ConfigError::ValidationError(format!(
                "thumbnail.format must be \"webp\" or \"png\", got \"{}\"",
                self.thumbnail.format
            )));
        }
        if self.import.allowed_mime_types.is_empty() {
            return Err(ConfigError::ValidationError(
                "import.allowed_mime_types must not be empty".into(),
            ));
        }
        if self.import.crawl.max_pages == 0 || self.import.crawl.max_images == 0 {
            return Err(ConfigError::ValidationError(
                "import.crawl.max_pages and import.crawl.max_images must be > 0".into(),
            ));
        }
        Ok(())
    }
}

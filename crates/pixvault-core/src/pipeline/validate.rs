//! Input validation: size limits, content signatures and the allowed mime set.

use std::collections::HashSet;

use crate::config::LimitsConfig;
use crate::error::{TaskError, TaskResult};
use crate::types::MimeType;

/// Validates item bytes before and after decode.
#[derive(Debug, Clone)]
pub struct Validator {
    limits: LimitsConfig,
    allowed: HashSet<MimeType>,
}

impl Validator {
    /// Create a new validator with the given limits and allowed mime types.
    pub fn new(limits: LimitsConfig, allowed: &[MimeType]) -> Self {
        Self {
            limits,
            allowed: allowed.iter().copied().collect(),
        }
    }

    /// Reject items above the configured size limit.
    pub fn check_size(&self, len: u64, source_label: &str) -> TaskResult<()> {
        if len > self.limits.max_bytes() {
            return Err(TaskError::TooLarge {
                source_label: source_label.to_string(),
                size_mb: len / (1024 * 1024),
                max_mb: self.limits.max_file_size_mb,
            });
        }
        Ok(())
    }

    /// Check the detected type against the allowed set.
    ///
    /// `detected` is `None` when the decoder recognized a format outside the
    /// closed set; `format` names it for the error message.
    pub fn ensure_allowed(
        &self,
        detected: Option<MimeType>,
        format: &str,
        source_label: &str,
    ) -> TaskResult<MimeType> {
        match detected {
            Some(mime) if self.allowed.contains(&mime) => Ok(mime),
            Some(mime) => Err(TaskError::Unsupported {
                source_label: source_label.to_string(),
                format: mime.to_string(),
            }),
            None => Err(TaskError::Unsupported {
                source_label: source_label.to_string(),
                format: format.to_string(),
            }),
        }
    }

    /// Identify the image type from its leading magic bytes.
    ///
    /// Returns `None` for anything outside the closed mime set.
    pub fn sniff(header: &[u8]) -> Option<MimeType> {
        if header.len() < 4 {
            return None;
        }

        // JPEG: FF D8 FF
        if header[0] == 0xFF && header[1] == 0xD8 && header[2] == 0xFF {
            return Some(MimeType::Jpeg);
        }

        // PNG: 89 50 4E 47
        if header[0] == 0x89 && header[1] == b'P' && header[2] == b'N' && header[3] == b'G' {
            return Some(MimeType::Png);
        }

        // GIF: GIF8
        if header.starts_with(b"GIF8") {
            return Some(MimeType::Gif);
        }

        // WebP: RIFF....WEBP
        if header.starts_with(b"RIFF") {
            if header.len() >= 12 && &header[8..12] == b"WEBP" {
                return Some(MimeType::Webp);
            }
            return None;
        }

        // BMP: BM
        if header[0] == b'B' && header[1] == b'M' {
            return Some(MimeType::Bmp);
        }

        // TIFF: II (little-endian) or MM (big-endian) followed by version 42
        let is_tiff_le =
            header[0] == b'I' && header[1] == b'I' && header[2] == 0x2A && header[3] == 0x00;
        let is_tiff_be =
            header[0] == b'M' && header[1] == b'M' && header[2] == 0x00 && header[3] == 0x2A;
        if is_tiff_le || is_tiff_be {
            return Some(MimeType::Tiff);
        }

        None
    }
}

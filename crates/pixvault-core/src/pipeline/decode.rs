//! Image decoding with format detection, validation, and timeout support.

use image::{DynamicImage, GenericImageView, ImageFormat};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::LimitsConfig;
use crate::error::TaskError;
use crate::jobs::spawn_blocking_in_slot;

/// Image decoder with configurable limits and timeout.
#[derive(Debug, Clone)]
pub struct ImageDecoder {
    limits: LimitsConfig,
}

/// Result of decoding an image.
pub struct DecodedImage {
    /// The decoded image data
    pub image: DynamicImage,
    /// Detected image format
    pub format: ImageFormat,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

impl ImageDecoder {
    /// Create a new decoder with the given limits.
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    /// Decode an in-memory image on the blocking pool, bounded by the
    /// decode timeout and the dimension limit.
    pub async fn decode_from_bytes(
        &self,
        bytes: Arc<[u8]>,
        source_label: &str,
    ) -> Result<DecodedImage, TaskError> {
        let label = source_label.to_string();
        let timeout_duration = Duration::from_millis(self.limits.decode_timeout_ms);

        let decode_result = timeout(timeout_duration, async move {
            spawn_blocking_in_slot(move || Self::decode_bytes_sync(&bytes, &label)).await
        })
        .await;

        match decode_result {
            Ok(Ok(Ok(decoded))) => {
                if decoded.width > self.limits.max_image_dimension
                    || decoded.height > self.limits.max_image_dimension
                {
                    return Err(TaskError::ImageTooLarge {
                        source_label: source_label.to_string(),
                        width: decoded.width,
                        height: decoded.height,
                        max_dim: self.limits.max_image_dimension,
                    });
                }
                Ok(decoded)
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(e)) => Err(TaskError::Corrupt {
                source_label: source_label.to_string(),
                message: format!("Decoder task failed: {}", e),
            }),
            Err(_) => Err(TaskError::Timeout {
                source_label: source_label.to_string(),
                stage: "decode".to_string(),
                timeout_ms: self.limits.decode_timeout_ms,
            }),
        }
    }

    /// Synchronous decode from bytes (runs in spawn_blocking).
    fn decode_bytes_sync(bytes: &[u8], source_label: &str) -> Result<DecodedImage, TaskError> {
        use std::io::Cursor;

        let reader = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| TaskError::Corrupt {
                source_label: source_label.to_string(),
                message: format!("Cannot detect image format: {}", e),
            })?;
        let format = reader.format().ok_or_else(|| TaskError::Unsupported {
            source_label: source_label.to_string(),
            format: "unknown".to_string(),
        })?;
        let image = reader.decode().map_err(|e| match e {
            image::ImageError::Unsupported(_) => TaskError::Unsupported {
                source_label: source_label.to_string(),
                format: format_to_string(format),
            },
            other => TaskError::Corrupt {
                source_label: source_label.to_string(),
                message: other.to_string(),
            },
        })?;

        let (width, height) = image.dimensions();
        Ok(DecodedImage {
            image,
            format,
            width,
            height,
        })
    }
}

/// Convert an ImageFormat to a string representation.
pub fn format_to_string(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "jpeg".to_string(),
        ImageFormat::Png => "png".to_string(),
        ImageFormat::WebP => "webp".to_string(),
        ImageFormat::Gif => "gif".to_string(),
        ImageFormat::Tiff => "tiff".to_string(),
        ImageFormat::Bmp => "bmp".to_string(),
        ImageFormat::Ico => "ico".to_string(),
        ImageFormat::Pnm => "pnm".to_string(),
        ImageFormat::Avif => "avif".to_string(),
        _ => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(width, height);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_format_to_string() {
        assert_eq!(format_to_string(ImageFormat::Jpeg), "jpeg");
        assert_eq!(format_to_string(ImageFormat::Png), "png");
        assert_eq!(format_to_string(ImageFormat::WebP), "webp");
    }

    #[tokio::test]
    async fn test_decode_png_dimensions() {
        let decoder = ImageDecoder::new(LimitsConfig::default());
        let decoded = decoder
            .decode_from_bytes(Arc::from(png_bytes(40, 30)), "a.png")
            .await
            .unwrap();
        assert_eq!(decoded.format, ImageFormat::Png);
        assert_eq!((decoded.width, decoded.height), (40, 30));
    }

    #[tokio::test]
    async fn test_decode_truncated_png_is_corrupt() {
        let mut bytes = png_bytes(40, 30);
        bytes.truncate(20);
        let decoder = ImageDecoder::new(LimitsConfig::default());
        let err = decoder
            .decode_from_bytes(Arc::from(bytes), "broken.png")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TaskError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_decode_text_is_unsupported() {
        let decoder = ImageDecoder::new(LimitsConfig::default());
        let err = decoder
            .decode_from_bytes(Arc::from(b"just some notes".to_vec()), "notes.txt")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TaskError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_decode_rejects_oversized_dimensions() {
        let limits = LimitsConfig {
            max_image_dimension: 16,
            ..LimitsConfig::default()
        };
        let decoder = ImageDecoder::new(limits);
        let err = decoder
            .decode_from_bytes(Arc::from(png_bytes(32, 8)), "wide.png")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TaskError::ImageTooLarge { width: 32, .. }));
    }
}

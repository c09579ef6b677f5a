//! The image processor capability and its raster implementation.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{TaskError, TaskResult};
use crate::jobs::spawn_blocking_in_slot;
use crate::types::{ExifData, MimeType};

use super::decode::{format_to_string, ImageDecoder};
use super::hash::Hasher;
use super::metadata::MetadataExtractor;
use super::thumbnail::ThumbnailGenerator;
use super::validate::Validator;

/// Decoded facts about one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    /// `None` when the decoder recognized a format outside the allowed set
    pub mime_type: Option<MimeType>,
    /// Decoder format name, used in error messages
    pub format: String,
    pub exif: Option<ExifData>,
    pub perceptual_hash: Option<String>,
}

/// Turns raw bytes into metadata and a thumbnail.
///
/// Both operations fail with `Corrupt` or `Unsupported` task errors.
#[async_trait]
pub trait ImageProcessor: Send + Sync {
    async fn metadata(&self, bytes: Arc<[u8]>, source_label: &str) -> TaskResult<ImageMetadata>;

    async fn thumbnail(&self, bytes: Arc<[u8]>, source_label: &str) -> TaskResult<Vec<u8>>;
}

/// Processor backed by the `image` crate.
pub struct RasterProcessor {
    decoder: ImageDecoder,
    thumbnail_gen: ThumbnailGenerator,
    hasher: Arc<Hasher>,
}

impl RasterProcessor {
    pub fn new(config: &Config) -> Self {
        Self {
            decoder: ImageDecoder::new(config.limits.clone()),
            thumbnail_gen: ThumbnailGenerator::new(config.thumbnail.clone()),
            hasher: Arc::new(Hasher::new()),
        }
    }

    /// Cheap rejection of content that is not an image in the closed set,
    /// before paying for a blocking decode.
    fn check_signature(bytes: &[u8], source_label: &str) -> TaskResult<()> {
        if Validator::sniff(bytes).is_none() {
            return Err(TaskError::Unsupported {
                source_label: source_label.to_string(),
                format: "unknown".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ImageProcessor for RasterProcessor {
    async fn metadata(&self, bytes: Arc<[u8]>, source_label: &str) -> TaskResult<ImageMetadata> {
        Self::check_signature(&bytes, source_label)?;

        let start = std::time::Instant::now();
        let decoded = self
            .decoder
            .decode_from_bytes(Arc::clone(&bytes), source_label)
            .await?;
        tracing::trace!("  Decode {}: {:?}", source_label, start.elapsed());

        let hasher = Arc::clone(&self.hasher);
        let image = decoded.image;
        let (exif, perceptual_hash) = spawn_blocking_in_slot(move || {
            let exif = MetadataExtractor::extract(&bytes);
            let phash = hasher.perceptual_hash(&image);
            (exif, phash)
        })
        .await
        .map_err(|e| TaskError::Corrupt {
            source_label: source_label.to_string(),
            message: format!("Metadata task failed: {}", e),
        })?;

        Ok(ImageMetadata {
            width: decoded.width,
            height: decoded.height,
            mime_type: MimeType::from_format(decoded.format),
            format: format_to_string(decoded.format),
            exif,
            perceptual_hash: Some(perceptual_hash),
        })
    }

    async fn thumbnail(&self, bytes: Arc<[u8]>, source_label: &str) -> TaskResult<Vec<u8>> {
        Self::check_signature(&bytes, source_label)?;

        let decoded = self.decoder.decode_from_bytes(bytes, source_label).await?;
        let generator = self.thumbnail_gen.clone();
        let label = source_label.to_string();
        spawn_blocking_in_slot(move || generator.generate_bytes(&decoded.image, &label))
            .await
            .map_err(|e| TaskError::Corrupt {
                source_label: source_label.to_string(),
                message: format!("Thumbnail task failed: {}", e),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    fn encoded(format: ImageFormat) -> Arc<[u8]> {
        let img = DynamicImage::new_rgb8(64, 48);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        Arc::from(buf.into_inner())
    }

    #[tokio::test]
    async fn test_metadata_for_png() {
        let processor = RasterProcessor::new(&Config::default());
        let meta = processor
            .metadata(encoded(ImageFormat::Png), "a.png")
            .await
            .unwrap();
        assert_eq!((meta.width, meta.height), (64, 48));
        assert_eq!(meta.mime_type, Some(MimeType::Png));
        assert!(meta.perceptual_hash.is_some());
        assert!(meta.exif.is_none());
    }

    #[tokio::test]
    async fn test_metadata_rejects_text() {
        let processor = RasterProcessor::new(&Config::default());
        let err = processor
            .metadata(Arc::from(b"plain text notes".to_vec()), "notes.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_metadata_corrupt_png() {
        let bytes = encoded(ImageFormat::Png);
        let truncated: Arc<[u8]> = Arc::from(&bytes[..24]);
        let processor = RasterProcessor::new(&Config::default());
        let err = processor.metadata(truncated, "cut.png").await.unwrap_err();
        assert!(matches!(err, TaskError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_thumbnail_is_webp_by_default() {
        let processor = RasterProcessor::new(&Config::default());
        let thumb = processor
            .thumbnail(encoded(ImageFormat::Png), "a.png")
            .await
            .unwrap();
        assert_eq!(Validator::sniff(&thumb), Some(MimeType::Webp));
    }
}

//! Thumbnail generation with WebP or PNG output.

use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

use crate::config::ThumbnailConfig;
use crate::error::{TaskError, TaskResult};

/// Generates thumbnails from decoded images.
#[derive(Debug, Clone)]
pub struct ThumbnailGenerator {
    config: ThumbnailConfig,
}

impl ThumbnailGenerator {
    pub fn new(config: ThumbnailConfig) -> Self {
        Self { config }
    }

    /// Image format of generated thumbnails.
    pub fn format(&self) -> ImageFormat {
        match self.config.format.as_str() {
            "png" => ImageFormat::Png,
            _ => ImageFormat::WebP,
        }
    }

    /// Resize (longest edge = configured size) and encode.
    ///
    /// An encoder failure means the decoded pixel data is unusable, so it is
    /// reported as a corrupt item.
    pub fn generate_bytes(&self, image: &DynamicImage, source_label: &str) -> TaskResult<Vec<u8>> {
        let thumbnail = image.thumbnail(self.config.size, self.config.size);

        // The WebP encoder only accepts 8-bit RGB(A)
        let thumbnail = DynamicImage::ImageRgba8(thumbnail.to_rgba8());

        let mut buffer = Cursor::new(Vec::new());
        thumbnail
            .write_to(&mut buffer, self.format())
            .map_err(|e| TaskError::Corrupt {
                source_label: source_label.to_string(),
                message: format!("Thumbnail encoding failed: {}", e),
            })?;

        Ok(buffer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn generator(size: u32, format: &str) -> ThumbnailGenerator {
        ThumbnailGenerator::new(ThumbnailConfig {
            size,
            format: format.to_string(),
        })
    }

    #[test]
    fn test_thumbnail_webp_bytes() {
        let img = DynamicImage::new_rgb8(200, 200);
        let bytes = generator(64, "webp").generate_bytes(&img, "a.png").unwrap();
        // WebP files start with "RIFF"
        assert_eq!(&bytes[0..4], b"RIFF");
    }

    #[test]
    fn test_thumbnail_keeps_aspect_ratio() {
        let img = DynamicImage::new_rgb8(1000, 500);
        let bytes = generator(128, "png").generate_bytes(&img, "wide.png").unwrap();
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert_eq!(thumb.dimensions(), (128, 64));
    }

    #[test]
    fn test_thumbnail_format_selection() {
        assert_eq!(generator(64, "webp").format(), ImageFormat::WebP);
        assert_eq!(generator(64, "png").format(), ImageFormat::Png);
    }
}

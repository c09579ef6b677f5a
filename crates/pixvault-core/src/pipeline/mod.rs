//! Per-item processing stages.
//!
//! - **hash**: BLAKE3 fingerprints and perceptual hashes
//! - **validate**: size limits, signatures and the allowed mime set
//! - **decode**: bounded, timed decoding on the blocking pool
//! - **metadata**: EXIF extraction
//! - **thumbnail**: WebP/PNG thumbnails
//! - **processor**: the `ImageProcessor` capability tying the above together
//! - **channel**: bounded channels for backpressure

pub mod channel;
pub mod decode;
pub mod hash;
pub mod metadata;
pub mod processor;
pub mod thumbnail;
pub mod validate;

pub use decode::{DecodedImage, ImageDecoder};
pub use hash::Hasher;
pub use metadata::MetadataExtractor;
pub use processor::{ImageMetadata, ImageProcessor, RasterProcessor};
pub use thumbnail::ThumbnailGenerator;
pub use validate::Validator;

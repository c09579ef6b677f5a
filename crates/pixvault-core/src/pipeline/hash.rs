//! Content fingerprints and perceptual hashes.

use blake3::Hasher as Blake3Hasher;
use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig, ImageHash};

use crate::types::Fingerprint;

/// Provides content fingerprints for deduplication and perceptual hashes
/// for near-duplicate search.
///
/// The perceptual hasher is pre-configured and cached to avoid
/// re-allocating the same `HasherConfig` for every image.
pub struct Hasher {
    phash_hasher: image_hasher::Hasher,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Create a new hasher with a pre-configured perceptual hash algorithm.
    pub fn new() -> Self {
        let phash_hasher = HasherConfig::new()
            .hash_alg(HashAlg::DoubleGradient)
            .hash_size(16, 16)
            .to_hasher();
        Self { phash_hasher }
    }

    /// BLAKE3 fingerprint of raw bytes. Pure and deterministic.
    pub fn fingerprint(data: &[u8]) -> Fingerprint {
        let mut hasher = Blake3Hasher::new();
        hasher.update(data);
        Fingerprint::from_hex(hasher.finalize().to_hex().to_string())
    }

    /// Generate a perceptual hash for near-duplicate detection.
    ///
    /// Similar images will have similar hashes, allowing detection of
    /// resized, cropped, or slightly modified versions.
    pub fn perceptual_hash(&self, image: &DynamicImage) -> String {
        let hash = self.phash_hasher.hash_image(image);
        hash.to_base64()
    }

    /// Compare two perceptual hashes and return their Hamming distance.
    ///
    /// Returns `None` if either hash is invalid.
    pub fn perceptual_distance(hash1: &str, hash2: &str) -> Option<u32> {
        let h1 = ImageHash::<Vec<u8>>::from_base64(hash1).ok()?;
        let h2 = ImageHash::<Vec<u8>>::from_base64(hash2).ok()?;
        Some(h1.dist(&h2))
    }
}

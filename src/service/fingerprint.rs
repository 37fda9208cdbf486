//! Image fingerprinting: SHA-256 over the raw bytes plus a 64-bit gradient hash

use image::{GenericImageView, load_from_memory};
use image_hasher::{HashAlg, HasherConfig};
use sha2::{Digest, Sha256};

use crate::model::{ContentDigest, Fingerprint, PerceptualHash, fingerprint::DIGEST_LEN};

/// Hash grid; the gradient hash yields width * height bits
const HASH_WIDTH: u32 = 8;
const HASH_HEIGHT: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

/// Compute the fingerprint of an encoded image
///
/// The perceptual hash downsizes the image to a 9x8 grayscale grid and records
/// whether brightness increases between horizontally adjacent cells.
pub fn compute_fingerprint(bytes: &[u8]) -> Result<Fingerprint, FingerprintError> {
    if bytes.is_empty() {
        return Err(FingerprintError::InvalidImage("empty payload".to_string()));
    }

    let img = load_from_memory(bytes)
        .map_err(|e| FingerprintError::InvalidImage(e.to_string()))?;
    let (width, height) = img.dimensions();

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&hasher.finalize());

    let phasher = HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .hash_size(HASH_WIDTH, HASH_HEIGHT)
        .to_hasher();
    let hash = phasher.hash_image(&img);
    let hash_bytes = hash.as_bytes();

    let mut phash = [0u8; 8];
    let len = hash_bytes.len().min(8);
    phash[..len].copy_from_slice(&hash_bytes[..len]);

    Ok(Fingerprint {
        digest: ContentDigest::from_bytes(digest),
        phash: PerceptualHash::new(u64::from_be_bytes(phash)),
        byte_size: bytes.len(),
        width,
        height,
    })
}

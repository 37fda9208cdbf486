//! Image identity: cryptographic content digest plus perceptual hash

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of the SHA-256 content digest in bytes
pub const DIGEST_LEN: usize = 32;

/// SHA-256 digest over the raw image bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest([u8; DIGEST_LEN]);

impl ContentDigest {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Lowercase hex encoding (64 chars)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-char hex string
    pub fn from_hex(hex: &str) -> Option<Self> {
        let mut out = [0u8; DIGEST_LEN];
        hex::decode_to_slice(hex, &mut out).ok()?;
        Some(Self(out))
    }

    /// First 8 hex chars, for log lines and explanations
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid content digest: {}", hex)))
    }
}

/// 64-bit perceptual hash, compared by Hamming distance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerceptualHash(u64);

impl PerceptualHash {
    pub fn new(bits: u64) -> Self {
        Self(bits)
    }

    /// Number of differing bits
    pub fn distance(&self, other: &PerceptualHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Combined identity of an image
///
/// Identity is the content digest. Size and dimensions are informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub digest: ContentDigest,
    pub phash: PerceptualHash,
    pub byte_size: usize,
    pub width: u32,
    pub height: u32,
}

impl Fingerprint {
    /// Whether two images are visually equivalent under the given threshold
    pub fn is_near_duplicate(&self, other: &Fingerprint, threshold: u32) -> bool {
        self.phash.distance(&other.phash) <= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_hex_roundtrip() {
        let mut bytes = [0u8; DIGEST_LEN];
        bytes[0] = 0xab;
        bytes[31] = 0x01;
        let digest = ContentDigest::from_bytes(bytes);

        let hex = digest.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("ab00"));
        assert_eq!(ContentDigest::from_hex(&hex), Some(digest));
        assert_eq!(digest.short(), "ab000000");
    }

    #[test]
    fn test_digest_rejects_bad_hex() {
        assert!(ContentDigest::from_hex("abc").is_none());
        assert!(ContentDigest::from_hex(&"zz".repeat(32)).is_none());
        assert!(ContentDigest::from_hex(&"ab".repeat(33)).is_none());
        assert!(ContentDigest::from_hex(&"AB".repeat(32)).is_some());
    }

    #[test]
    fn test_digest_serializes_as_hex_string() {
        let digest = ContentDigest::from_bytes([0x11; DIGEST_LEN]);
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{}\"", "11".repeat(32)));
        let back: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
    }

    #[test]
    fn test_phash_distance() {
        let a = PerceptualHash::new(0b1011);
        let b = PerceptualHash::new(0b0001);
        assert_eq!(a.distance(&b), 2);
        assert_eq!(a.distance(&a), 0);
        assert_eq!(PerceptualHash::new(0).distance(&PerceptualHash::new(u64::MAX)), 64);
    }
}

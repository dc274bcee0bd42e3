//! Content digests for downloaded archives
//!
//! Provides [`ContentDigest`], a strongly-typed 32-byte Blake3 digest used to
//! identify a fetched dataset archive and to pin an expected archive in config.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 32-byte content digest (Blake3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Create a digest from raw bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create digest from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DigestError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| DigestError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Digest a complete in-memory buffer
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self::new(*blake3::hash(data).as_bytes())
    }

    /// Short string representation (first 16 hex chars), used in log lines
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ContentDigest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())?;
        Self::from_slice(&bytes)
    }
}

impl serde::Serialize for ContentDigest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ContentDigest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let text = <String as serde::Deserialize>::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental digest over a byte stream
///
/// Fed chunk by chunk while an archive is written to disk so the file never
/// has to be read back in full.
#[derive(Debug, Default, Clone)]
pub struct DigestBuilder {
    hasher: blake3::Hasher,
    len: u64,
}

impl DigestBuilder {
    /// Start an empty digest
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk
    #[inline]
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Number of bytes fed so far
    #[inline]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether nothing has been fed yet
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Finish and produce the digest
    #[inline]
    #[must_use]
    pub fn finish(&self) -> ContentDigest {
        ContentDigest::new(*self.hasher.finalize().as_bytes())
    }
}

/// Errors that can occur when parsing a digest
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// Invalid digest length
    #[error("invalid digest length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Hex encoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_from_slice_invalid_length() {
        let result = ContentDigest::from_slice(&[1u8; 31]);
        assert!(matches!(
            result,
            Err(DigestError::InvalidLength {
                expected: 32,
                actual: 31
            })
        ));
    }

    #[test]
    fn digest_display_and_parse() {
        let digest = ContentDigest::compute(b"PK\x03\x04archive");
        let parsed: ContentDigest = digest.to_string().parse().unwrap();
        assert_eq!(digest, parsed);
        assert!(digest.to_string().starts_with(&digest.short()));
    }

    #[test]
    fn builder_matches_one_shot_digest() {
        let mut builder = DigestBuilder::new();
        builder.update(b"PK\x03\x04");
        builder.update(b"rest of the archive");
        assert_eq!(builder.len(), 23);
        assert_eq!(
            builder.finish(),
            ContentDigest::compute(b"PK\x03\x04rest of the archive")
        );
    }

    #[test]
    fn digest_serde_is_hex_string() {
        let digest = ContentDigest::compute(b"test");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{digest}\""));
        let decoded: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, digest);
    }
}

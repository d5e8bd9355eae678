//! Content-addressed hashing primitives
//!
//! Provides [`ContentHash`], the 32-byte digest of a file's bytes, and
//! [`RevisionId`], the digest of a whole file set (the "srcmd5" of a package
//! revision, or the "xsrcmd5" of an expanded one).

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 32-byte content hash (Blake3)
///
/// Identifies file content inside the blob store. Immutable and `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes
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

    /// Create hash from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != 32 {
            return Err(HashError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Compute Blake3 hash of arbitrary data
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Self::new(*hash.as_bytes())
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl AsRef<[u8; 32]> for ContentHash {
    fn as_ref(&self) -> &[u8; 32] {
        &self.0
    }
}

// Hashes always travel as hex strings; listings are JSON documents.
impl serde::Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifier of a package revision
///
/// Computed over a file set's `(name, content hash)` pairs in name order, so
/// two identical file sets always produce the same id no matter how they were
/// assembled. Used both for a package's own files (srcmd5) and for its fully
/// expanded files (xsrcmd5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RevisionId(ContentHash);

impl RevisionId {
    /// Wrap an already computed digest
    #[inline]
    #[must_use]
    pub const fn from_hash(hash: ContentHash) -> Self {
        Self(hash)
    }

    /// Digest over `(name, hash)` pairs
    ///
    /// The caller supplies pairs in name order; [`crate::FileSet`] always does.
    #[must_use]
    pub fn digest<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a ContentHash)>,
    {
        let mut hasher = blake3::Hasher::new();
        for (name, hash) in entries {
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
            hasher.update(hash.as_bytes());
            hasher.update(b"\n");
        }
        Self(ContentHash::new(*hasher.finalize().as_bytes()))
    }

    /// Underlying digest
    #[inline]
    #[must_use]
    pub const fn as_hash(&self) -> &ContentHash {
        &self.0
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        self.0.short()
    }
}

impl Display for RevisionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for RevisionId {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl serde::Serialize for RevisionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for RevisionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        ContentHash::deserialize(deserializer).map(Self)
    }
}

/// Errors that can occur when working with content hashes
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HashError {
    /// Invalid hash length
    #[error("invalid hash length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Hex encoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_from_slice_invalid_length() {
        let bytes = vec![1u8; 31];
        let result = ContentHash::from_slice(&bytes);
        assert!(matches!(
            result,
            Err(HashError::InvalidLength {
                expected: 32,
                actual: 31
            })
        ));
    }

    #[test]
    fn content_hash_compute_deterministic() {
        let data = b"hello world";
        assert_eq!(ContentHash::compute(data), ContentHash::compute(data));
        assert_ne!(ContentHash::compute(b"data1"), ContentHash::compute(b"data2"));
    }

    #[test]
    fn content_hash_display_and_parse() {
        let hash = ContentHash::compute(b"test");
        let s = hash.to_string();
        assert_eq!(s.len(), 64);
        let parsed: ContentHash = s.parse().unwrap();
        assert_eq!(hash, parsed);
        assert!(s.starts_with(&hash.short()));
    }

    #[test]
    fn content_hash_rejects_garbage() {
        assert!(matches!(
            "not-hex".parse::<ContentHash>(),
            Err(HashError::HexDecode(_))
        ));
    }

    #[test]
    fn content_hash_serde_is_hex_string() {
        let hash = ContentHash::compute(b"test");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{hash}\""));
        let decoded: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, decoded);
    }

    #[test]
    fn revision_digest_depends_on_names_and_hashes() {
        let a = ContentHash::compute(b"a");
        let b = ContentHash::compute(b"b");

        let base = RevisionId::digest([("x", &a), ("y", &b)]);
        assert_eq!(base, RevisionId::digest([("x", &a), ("y", &b)]));
        assert_ne!(base, RevisionId::digest([("x", &b), ("y", &a)]));
        assert_ne!(base, RevisionId::digest([("x", &a), ("z", &b)]));
    }

    #[test]
    fn revision_digest_separates_name_boundaries() {
        let h = ContentHash::compute(b"same");
        let joined = RevisionId::digest([("ab", &h)]);
        let split = RevisionId::digest([("a", &h), ("b", &h)]);
        assert_ne!(joined, split);
    }

    #[test]
    fn revision_id_roundtrips_through_text() {
        let id = RevisionId::digest([("f", &ContentHash::compute(b"x"))]);
        let parsed: RevisionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}

//! Cryptographic hash types and utilities.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 content hash represented as 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Compute SHA-256 hash of data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        Self(result.into())
    }

    /// Create an incremental hasher.
    pub fn hasher() -> ContentHasher {
        ContentHasher(Sha256::new())
    }

    fn from_vec(bytes: Vec<u8>) -> crate::Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            crate::Error::InvalidHash(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Parse from base64 string.
    pub fn from_base64(s: &str) -> crate::Result<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
        Self::from_vec(bytes)
    }

    /// Encode as base64 string.
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 {
            return Err(crate::Error::InvalidHash(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str =
                std::str::from_utf8(chunk).map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse from Nix base32.
    pub fn from_nix_base32(s: &str) -> crate::Result<Self> {
        let bytes = nix_base32::from_nix_base32(s)
            .ok_or_else(|| crate::Error::InvalidHash(format!("invalid nix base32: {s}")))?;
        Self::from_vec(bytes)
    }

    /// Encode as Nix base32.
    pub fn to_nix_base32(&self) -> String {
        nix_base32::to_nix_base32(&self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental SHA-256 hasher.
pub struct ContentHasher(Sha256);

impl ContentHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> ContentHash {
        ContentHash(self.0.finalize().into())
    }
}

/// A NAR hash. Always SHA-256, the algorithm the Nix store records.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NarHash(ContentHash);

impl NarHash {
    /// Create from a ContentHash.
    pub fn from_content_hash(hash: ContentHash) -> Self {
        Self(hash)
    }

    /// Get the underlying content hash.
    pub fn content_hash(&self) -> &ContentHash {
        &self.0
    }

    /// Parse any of the textual forms Nix prints for a sha256 hash:
    /// `sha256:<nix32>`, `sha256:<hex>` or SRI `sha256-<base64>`.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.starts_with("sha256-") {
            return Self::from_sri(s);
        }
        let digest = s.strip_prefix("sha256:").ok_or_else(|| {
            crate::Error::InvalidHash(format!("expected sha256 hash, got: {s}"))
        })?;
        let hash = match digest.len() {
            52 => ContentHash::from_nix_base32(digest)?,
            64 => ContentHash::from_hex(digest)?,
            n => {
                return Err(crate::Error::InvalidHash(format!(
                    "unexpected sha256 digest length {n}"
                )));
            }
        };
        Ok(Self(hash))
    }

    /// Parse from SRI format (sha256-<base64>).
    pub fn from_sri(s: &str) -> crate::Result<Self> {
        let b64 = s.strip_prefix("sha256-").ok_or_else(|| {
            crate::Error::InvalidHash(format!("expected sha256- prefix, got: {s}"))
        })?;
        Ok(Self(ContentHash::from_base64(b64)?))
    }

    /// Encode as SRI format.
    pub fn to_sri(&self) -> String {
        format!("sha256-{}", self.0.to_base64())
    }

    /// Encode as Nix base32 format.
    pub fn to_nix_base32(&self) -> String {
        self.0.to_nix_base32()
    }

    /// Encode as `sha256:<nix32>`, the form used in narinfo and fingerprints.
    pub fn to_typed_nix_base32(&self) -> String {
        format!("sha256:{}", self.to_nix_base32())
    }
}

impl fmt::Debug for NarHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NarHash({})", self.to_typed_nix_base32())
    }
}

impl fmt::Display for NarHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_typed_nix_base32())
    }
}

/// Incremental hasher for a byte stream that also counts its length.
pub struct NarHasher {
    hasher: ContentHasher,
    size: u64,
}

impl NarHasher {
    /// Create a new NAR hasher.
    pub fn new() -> Self {
        Self {
            hasher: ContentHash::hasher(),
            size: 0,
        }
    }

    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.size += data.len() as u64;
    }

    /// Finalize and return the hash with the total byte count.
    pub fn finalize(self) -> (ContentHash, u64) {
        (self.hasher.finalize(), self.size)
    }
}

impl Default for NarHasher {
    fn default() -> Self {
        Self::new()
    }
}

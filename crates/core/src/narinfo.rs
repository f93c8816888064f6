//! Narinfo records submitted to the cache after a NAR upload.

use crate::hash::{ContentHash, NarHash};
use crate::store_path::{StoreDir, StorePath, StorePathHash};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deriver value sent when the deriver is unknown or deliberately omitted.
pub const UNKNOWN_DERIVER: &str = "unknown-deriver";

/// The narinfo body posted to `/<hash>.narinfo` once the NAR is uploaded.
///
/// All path-valued fields are basenames (`<hash>-<name>`); the cache knows its
/// own store directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarInfoCreate {
    /// Hash part of the store path.
    pub store_hash: String,
    /// Name part of the store path.
    pub store_suffix: String,
    /// Hash of the uncompressed NAR, `sha256:<nix32>`.
    pub nar_hash: String,
    /// Size of the uncompressed NAR.
    pub nar_size: u64,
    /// Lowercase hex sha256 of the compressed file.
    pub file_hash: String,
    /// Size of the compressed file.
    pub file_size: u64,
    /// Sorted reference basenames.
    pub references: Vec<String>,
    /// Deriver basename or [`UNKNOWN_DERIVER`].
    pub deriver: String,
    /// Base64 Ed25519 signature over the fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
    /// Compression applied to the uploaded file.
    pub compression: Compression,
}

/// Inputs gathered by the upload pipeline for one store path.
#[derive(Clone, Debug)]
pub struct NarInfoParts<'a> {
    pub store_path: &'a StorePath,
    pub nar_hash: &'a NarHash,
    pub nar_size: u64,
    pub file_hash: &'a ContentHash,
    pub file_size: u64,
    pub references: &'a [StorePath],
    pub deriver: Option<&'a StorePath>,
    pub compression: Compression,
}

impl NarInfoCreate {
    /// Assemble an unsigned record. References are sorted here.
    pub fn new(parts: NarInfoParts<'_>) -> Self {
        let mut references = parts.references.to_vec();
        references.sort();
        references.dedup();

        Self {
            store_hash: parts.store_path.hash().to_string(),
            store_suffix: parts.store_path.name().to_string(),
            nar_hash: parts.nar_hash.to_typed_nix_base32(),
            nar_size: parts.nar_size,
            file_hash: parts.file_hash.to_hex(),
            file_size: parts.file_size,
            references: references.iter().map(StorePath::basename).collect(),
            deriver: parts
                .deriver
                .map(StorePath::basename)
                .unwrap_or_else(|| UNKNOWN_DERIVER.to_string()),
            sig: None,
            compression: parts.compression,
        }
    }

    /// Rebuild the signing fingerprint from this record's fields.
    pub fn fingerprint(&self, store_dir: &StoreDir) -> crate::Result<String> {
        let store_path = StorePath::new(
            store_dir.clone(),
            StorePathHash::new(self.store_hash.as_str())?,
            self.store_suffix.as_str(),
        )?;
        let nar_hash = NarHash::parse(&self.nar_hash)?;
        let references = self
            .references
            .iter()
            .map(|r| StorePath::from_basename_in(store_dir.clone(), r))
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(fingerprint(&store_path, &nar_hash, self.nar_size, &references))
    }

    /// Check structural invariants before submission.
    pub fn validate(&self) -> crate::Result<()> {
        StorePathHash::new(self.store_hash.as_str())
            .map_err(|e| invalid(format!("store hash: {e}")))?;
        StorePath::new(
            StoreDir::default(),
            StorePathHash::new(self.store_hash.as_str())?,
            self.store_suffix.as_str(),
        )
        .map_err(|e| invalid(format!("store suffix: {e}")))?;

        if !self.nar_hash.starts_with("sha256:") {
            return Err(invalid(format!(
                "nar hash must be sha256:<nix32>, got {}",
                self.nar_hash
            )));
        }
        NarHash::parse(&self.nar_hash).map_err(|e| invalid(format!("nar hash: {e}")))?;
        if self.nar_size == 0 {
            return Err(invalid("nar size must be non-zero"));
        }

        ContentHash::from_hex(&self.file_hash).map_err(|e| invalid(format!("file hash: {e}")))?;
        if self.file_hash.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(invalid("file hash must be lowercase hex"));
        }
        if self.file_size == 0 {
            return Err(invalid("file size must be non-zero"));
        }

        for reference in &self.references {
            StorePath::from_basename(reference)
                .map_err(|e| invalid(format!("reference '{reference}': {e}")))?;
        }
        if self.references.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid("references must be sorted and unique"));
        }

        if self.deriver != UNKNOWN_DERIVER {
            StorePath::from_basename(&self.deriver)
                .map_err(|e| invalid(format!("deriver '{}': {e}", self.deriver)))?;
        }

        if let Some(sig) = &self.sig {
            use base64::Engine;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(sig)
                .map_err(|e| invalid(format!("signature is not base64: {e}")))?;
            if bytes.len() != 64 {
                return Err(invalid(format!(
                    "signature must be 64 bytes, got {}",
                    bytes.len()
                )));
            }
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> crate::Error {
    crate::Error::InvalidNarInfo(msg.into())
}

/// The string a cache signature covers.
///
/// Format: `1;<store path>;sha256:<nix32>;<nar size>;<ref>,<ref>,...` with
/// references as full, sorted, unique store paths. The nar hash must be the nix32
/// form, not SRI, or Nix cannot verify the signature.
pub fn fingerprint(
    store_path: &StorePath,
    nar_hash: &NarHash,
    nar_size: u64,
    references: &[StorePath],
) -> String {
    let mut refs: Vec<_> = references.iter().map(|r| r.to_path_string()).collect();
    refs.sort();
    refs.dedup();
    format!(
        "1;{};{};{};{}",
        store_path,
        nar_hash.to_typed_nix_base32(),
        nar_size,
        refs.join(",")
    )
}

/// Compression type for uploaded NAR files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Xz,
    Zstd,
}

impl Compression {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "xz" => Ok(Self::Xz),
            "zstd" | "zst" => Ok(Self::Zstd),
            _ => Err(crate::Error::InvalidConfig(format!(
                "unknown compression: {s}"
            ))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xz => write!(f, "xz"),
            Self::Zstd => write!(f, "zstd"),
        }
    }
}

//! Nix store path types and parsing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of the hash portion of a store path basename.
pub const STORE_PATH_HASH_LEN: usize = 32;

/// A Nix store path hash (the 32-character base32 portion).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorePathHash(String);

impl StorePathHash {
    /// Create from a string, validating format.
    pub fn new(hash: impl Into<String>) -> crate::Result<Self> {
        let hash = hash.into();
        if hash.len() != STORE_PATH_HASH_LEN {
            return Err(crate::Error::InvalidStorePath(format!(
                "store path hash must be {STORE_PATH_HASH_LEN} chars, got {}",
                hash.len()
            )));
        }
        // Nix base32 alphabet: 0-9, a-d, f-n, p-s, v-z
        for c in hash.chars() {
            if !matches!(c, '0'..='9' | 'a'..='d' | 'f'..='n' | 'p'..='s' | 'v'..='z') {
                return Err(crate::Error::InvalidStorePath(format!(
                    "invalid character in store path hash: {c}"
                )));
            }
        }
        Ok(Self(hash))
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StorePathHash {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<StorePathHash> for String {
    fn from(value: StorePathHash) -> Self {
        value.0
    }
}

impl fmt::Debug for StorePathHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorePathHash({self})")
    }
}

impl fmt::Display for StorePathHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The directory holding store paths, e.g. `/nix/store`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoreDir(String);

impl StoreDir {
    /// The standard Nix store directory.
    pub const DEFAULT: &'static str = "/nix/store";

    /// Create a store directory. Must be absolute; a trailing slash is dropped.
    pub fn new(dir: impl Into<String>) -> crate::Result<Self> {
        let dir = dir.into();
        let trimmed = dir.trim_end_matches('/');
        if !trimmed.starts_with('/') {
            return Err(crate::Error::InvalidStorePath(format!(
                "store directory must be absolute: {dir}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the directory as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a full store path that lives in this directory.
    pub fn parse_path(&self, path: &str) -> crate::Result<StorePath> {
        let rest = path
            .strip_prefix(self.0.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| {
                crate::Error::InvalidStorePath(format!("must start with {}/", self.0))
            })?;
        StorePath::from_basename_in(self.clone(), rest)
    }

    /// Rebuild the full path from a hash and name. Inverse of [`StorePath::split`].
    pub fn join(&self, hash: &StorePathHash, name: &str) -> String {
        format!("{}/{}-{}", self.0, hash, name)
    }
}

impl Default for StoreDir {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl TryFrom<String> for StoreDir {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<StoreDir> for String {
    fn from(value: StoreDir) -> Self {
        value.0
    }
}

impl fmt::Debug for StoreDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreDir({})", self.0)
    }
}

impl fmt::Display for StoreDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A full store path (`<store dir>/<hash>-<name>`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorePath {
    dir: StoreDir,
    hash: StorePathHash,
    name: String,
}

impl StorePath {
    /// Parse a full store path string under the default store directory.
    pub fn parse(path: &str) -> crate::Result<Self> {
        StoreDir::default().parse_path(path)
    }

    /// Create from components under the given store directory.
    pub fn new(dir: StoreDir, hash: StorePathHash, name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { dir, hash, name })
    }

    /// Construct a `StorePath` from a basename (`hash-name`) in the default store.
    pub fn from_basename(basename: &str) -> crate::Result<Self> {
        Self::from_basename_in(StoreDir::default(), basename)
    }

    /// Construct a `StorePath` from a basename (`hash-name`) in `dir`.
    pub fn from_basename_in(dir: StoreDir, basename: &str) -> crate::Result<Self> {
        if !basename.is_ascii() {
            return Err(crate::Error::InvalidStorePath(
                "store path contains non-ASCII characters".to_string(),
            ));
        }

        if basename.len() < STORE_PATH_HASH_LEN + 2 {
            return Err(crate::Error::InvalidStorePath("path too short".to_string()));
        }

        let (hash_part, rest) = basename.split_at(STORE_PATH_HASH_LEN);
        let name = rest.strip_prefix('-').ok_or_else(|| {
            crate::Error::InvalidStorePath("expected '-' after hash".to_string())
        })?;

        if name.contains('/') {
            return Err(crate::Error::InvalidStorePath(
                "store path must name a top-level store entry".to_string(),
            ));
        }

        Self::new(dir, StorePathHash::new(hash_part)?, name)
    }

    /// Get the store directory.
    pub fn store_dir(&self) -> &StoreDir {
        &self.dir
    }

    /// Get the store path hash.
    pub fn hash(&self) -> &StorePathHash {
        &self.hash
    }

    /// Get the name portion.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Split into the hash and the human-readable suffix.
    pub fn split(&self) -> (&StorePathHash, &str) {
        (&self.hash, &self.name)
    }

    /// Get the full path string.
    pub fn to_path_string(&self) -> String {
        self.dir.join(&self.hash, &self.name)
    }

    /// Get the basename (`hash-name`) without the store directory prefix.
    pub fn basename(&self) -> String {
        format!("{}-{}", self.hash, self.name)
    }
}

fn validate_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::InvalidStorePath(
            "name cannot be empty".to_string(),
        ));
    }
    for c in name.chars() {
        if !matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '+' | '?' | '=') {
            return Err(crate::Error::InvalidStorePath(format!(
                "invalid character in name: {c}"
            )));
        }
    }
    Ok(())
}

impl fmt::Debug for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorePath({})", self.to_path_string())
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_path_string())
    }
}

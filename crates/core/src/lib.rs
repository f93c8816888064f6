//! Core domain types shared by the ferry push client.
//!
//! This crate defines the data model used across all other crates:
//! - Store path identifiers and hashes
//! - NAR hashing
//! - Narinfo records and signing fingerprints
//! - Push configuration and credentials

pub mod config;
pub mod error;
pub mod hash;
pub mod narinfo;
pub mod store_path;

pub use config::{
    CompressionConfig, PushCache, PushConfig, PushSecret, RetryConfig, validate_cache_name,
};
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher, NarHash, NarHasher};
pub use narinfo::{Compression, NarInfoCreate, NarInfoParts, UNKNOWN_DERIVER, fingerprint};
pub use store_path::{StoreDir, StorePath, StorePathHash};

/// Uncompressed NAR size above which uploads bypass the cache subdomain: 100 MiB.
pub const LARGE_NAR_THRESHOLD: u64 = 100 * 1024 * 1024;

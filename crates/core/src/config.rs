//! Push client configuration types.

use crate::narinfo::Compression;
use crate::store_path::StoreDir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Credentials used for one push session.
#[derive(Clone, PartialEq, Eq)]
pub enum PushSecret {
    /// Bearer token only; narinfos are submitted unsigned.
    Token(String),
    /// Bearer token plus a signing key in `name:base64` or bare base64 form.
    TokenWithKey { token: String, signing_key: String },
}

impl PushSecret {
    /// The bearer token.
    pub fn token(&self) -> &str {
        match self {
            Self::Token(token) | Self::TokenWithKey { token, .. } => token,
        }
    }

    /// The signing key, when narinfos should be signed.
    pub fn signing_key(&self) -> Option<&str> {
        match self {
            Self::Token(_) => None,
            Self::TokenWithKey { signing_key, .. } => Some(signing_key),
        }
    }
}

impl fmt::Debug for PushSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => write!(f, "PushSecret::Token([REDACTED])"),
            Self::TokenWithKey { .. } => write!(f, "PushSecret::TokenWithKey([REDACTED])"),
        }
    }
}

/// A target cache and the secret used to push to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushCache {
    pub name: String,
    pub secret: PushSecret,
}

impl PushCache {
    pub fn new(name: impl Into<String>, secret: PushSecret) -> Self {
        Self {
            name: name.into(),
            secret,
        }
    }
}

/// Longest accepted cache name; names double as a DNS label.
pub const MAX_CACHE_NAME_LEN: usize = 63;

/// Check that `name` is safe as both a URL path segment and a host label:
/// ASCII letters, digits, `-` and `_`, at most [`MAX_CACHE_NAME_LEN`] long.
pub fn validate_cache_name(name: &str) -> crate::Result<()> {
    if name.is_empty() || name.len() > MAX_CACHE_NAME_LEN {
        return Err(crate::Error::InvalidConfig(format!(
            "cache name must be 1..={MAX_CACHE_NAME_LEN} characters, got {}",
            name.len()
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(crate::Error::InvalidConfig(format!(
            "cache name {name:?} contains invalid character {c:?}"
        )));
    }
    Ok(())
}

/// Client configuration, loaded from `config.toml` and `FERRY_*` env vars.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushConfig {
    /// Server base URL (e.g., "https://ferry.example.org").
    #[serde(default)]
    pub host: Option<String>,
    /// Route NAR uploads to `<cache>.<host>`. Disable for servers without
    /// wildcard DNS.
    #[serde(default = "default_subdomain_routing")]
    pub subdomain_routing: bool,
    /// Maximum parallel NAR uploads.
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    /// Send `unknown-deriver` instead of the real deriver.
    #[serde(default)]
    pub omit_deriver: bool,
    /// Compression for uploaded NARs.
    #[serde(default)]
    pub compression: CompressionConfig,
    /// Retry behaviour for network operations.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Local store directory.
    #[serde(default)]
    pub store_dir: StoreDir,
    /// Per-cache credentials keyed by cache name.
    #[serde(default)]
    pub caches: BTreeMap<String, CacheCredentials>,
}

/// Credentials for one cache.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CacheCredentials {
    /// Bearer token with push permission.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Signing secret key. WARNING: prefer `FERRY_CACHES__<NAME>__SIGNING_KEY`
    /// over storing it in the config file.
    #[serde(default)]
    pub signing_key: Option<String>,
}

impl fmt::Debug for CacheCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCredentials")
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("signing_key", &self.signing_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Compression algorithm and level.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompressionConfig {
    #[serde(default)]
    pub method: Compression,
    #[serde(default = "default_compression_level")]
    pub level: i32,
}

impl CompressionConfig {
    pub fn new(method: Compression, level: i32) -> Self {
        Self { method, level }
    }

    /// Validate the level against the method's supported range.
    pub fn validate(&self) -> crate::Result<()> {
        let range = match self.method {
            Compression::Xz => 0..=9,
            Compression::Zstd => 1..=22,
        };
        if !range.contains(&self.level) {
            return Err(crate::Error::InvalidConfig(format!(
                "{} compression level must be in {}..={}, got {}",
                self.method,
                range.start(),
                range.end(),
                self.level
            )));
        }
        Ok(())
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            method: Compression::Xz,
            level: default_compression_level(),
        }
    }
}

/// Exponential backoff settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Delay before the first retry; doubled for each further retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl RetryConfig {
    /// Upper bound for `max_retries`.
    pub const MAX_RETRIES_LIMIT: u32 = 20;

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_retries > Self::MAX_RETRIES_LIMIT {
            return Err(crate::Error::InvalidConfig(format!(
                "retry.max_retries must be at most {}, got {}",
                Self::MAX_RETRIES_LIMIT,
                self.max_retries
            )));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_subdomain_routing() -> bool {
    true
}

fn default_jobs() -> usize {
    8
}

fn default_compression_level() -> i32 {
    2
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    3
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            host: None,
            subdomain_routing: default_subdomain_routing(),
            jobs: default_jobs(),
            omit_deriver: false,
            compression: CompressionConfig::default(),
            retry: RetryConfig::default(),
            store_dir: StoreDir::default(),
            caches: BTreeMap::new(),
        }
    }
}

impl PushConfig {
    /// Validate configuration invariants.
    pub fn validate(&self) -> crate::Result<()> {
        let host = self.host()?;
        if !host.starts_with("http://") && !host.starts_with("https://") {
            return Err(crate::Error::InvalidConfig(
                "host must start with http:// or https://".to_string(),
            ));
        }
        if self.jobs == 0 {
            return Err(crate::Error::InvalidConfig(
                "jobs must be at least 1".to_string(),
            ));
        }
        self.compression.validate()?;
        self.retry.validate()
    }

    /// The configured host without a trailing slash.
    pub fn host(&self) -> crate::Result<&str> {
        self.host
            .as_deref()
            .map(|h| h.trim_end_matches('/'))
            .filter(|h| !h.is_empty())
            .ok_or_else(|| crate::Error::InvalidConfig("host is not set".to_string()))
    }

    /// Resolve the credentials for `cache`.
    pub fn push_cache(&self, cache: &str) -> crate::Result<PushCache> {
        validate_cache_name(cache)?;
        let creds = self.caches.get(cache).ok_or_else(|| {
            crate::Error::MissingCredential(format!("no credentials configured for cache {cache}"))
        })?;
        let token = creds
            .auth_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                crate::Error::MissingCredential(format!("no auth token for cache {cache}"))
            })?;
        let secret = match creds.signing_key.clone().filter(|k| !k.is_empty()) {
            Some(signing_key) => PushSecret::TokenWithKey { token, signing_key },
            None => PushSecret::Token(token),
        };
        Ok(PushCache::new(cache, secret))
    }
}

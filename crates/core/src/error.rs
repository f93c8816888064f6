//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid store path: {0}")]
    InvalidStorePath(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid narinfo: {0}")]
    InvalidNarInfo(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

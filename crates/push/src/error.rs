//! Error types for the push engine.

use ferry_signer::SignerError;
use thiserror::Error;

/// Errors from the local store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("unexpected output from {command}: {message}")]
    UnexpectedOutput { command: String, message: String },

    #[error("{0} is not inside the store")]
    NotInStore(String),

    #[error(transparent)]
    Core(#[from] ferry_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the remote cache API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(String),
}

impl ApiError {
    /// Transport failures, 5xx, 408 and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unauthorized | Self::Url(_) => false,
            Self::Status { status, .. } => *status >= 500 || matches!(status, 408 | 429),
            Self::Transport(_) => true,
        }
    }
}

/// Push failure for a single store path or a whole session.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("cache API error: {0}")]
    Api(#[from] ApiError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("NAR dump of {path} failed: {source}")]
    SourceProcess {
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("NAR stream ended before it was fully consumed")]
    IncompleteStream,

    #[error("hash mismatch for {path}: store recorded {expected}, stream produced {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("invalid narinfo for {path}: {source}")]
    InvalidMetadata {
        path: String,
        #[source]
        source: ferry_core::Error,
    },

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("signing key error: {0}")]
    Signing(#[from] SignerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PushError {
    /// Whether a fresh attempt could succeed.
    ///
    /// Hash mismatches, invalid narinfos and credential problems are
    /// deterministic and never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(err) => err.is_retryable(),
            Self::Store(_) | Self::SourceProcess { .. } | Self::IncompleteStream | Self::Io(_) => {
                true
            }
            Self::HashMismatch { .. }
            | Self::InvalidMetadata { .. }
            | Self::MissingCredential(_)
            | Self::Signing(_) => false,
        }
    }

    /// Whether the cache rejected our credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Api(ApiError::Unauthorized))
    }
}

impl From<ferry_core::Error> for PushError {
    fn from(err: ferry_core::Error) -> Self {
        match err {
            ferry_core::Error::MissingCredential(msg) => Self::MissingCredential(msg),
            other => Self::Store(StoreError::Core(other)),
        }
    }
}

/// Result type for push operations.
pub type PushResult<T> = std::result::Result<T, PushError>;

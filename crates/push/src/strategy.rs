//! Caller-supplied reactions to push events.

use crate::error::{ApiError, PushError};
use crate::retry::RetryStatus;
use ferry_core::config::CompressionConfig;
use ferry_core::store_path::StorePath;

/// How a single path push ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// The cache already had the path; nothing was uploaded.
    AlreadyPresent,
    /// The NAR and narinfo were uploaded.
    Uploaded,
}

/// Policy for one (session, store path) pair.
///
/// The engine calls these hooks and never prints anything itself. Every method
/// has a default so implementors only override what they report on.
pub trait PushStrategy: Send + Sync {
    /// The cache already has this path.
    fn on_already_present(&self) {}

    /// An upload attempt is starting. `nar_size` is the uncompressed size the
    /// store reports.
    fn on_attempt(&self, _status: RetryStatus, _nar_size: u64) {}

    /// The cache rejected the credential. The returned value becomes the push
    /// result.
    fn on_unauthorized(&self) -> Result<PushOutcome, PushError> {
        Err(PushError::Api(ApiError::Unauthorized))
    }

    /// Any other failure once retries are exhausted or the error is terminal.
    fn on_error(&self, err: PushError) -> Result<PushOutcome, PushError> {
        Err(err)
    }

    /// NAR and narinfo were both accepted.
    fn on_done(&self) {}

    /// Compressor used for this path's NAR.
    fn compression(&self) -> CompressionConfig {
        CompressionConfig::default()
    }

    /// Send `unknown-deriver` instead of the real deriver.
    fn omit_deriver(&self) -> bool {
        false
    }
}

/// Builds a fresh strategy for each path of a closure push.
pub trait StrategyFactory: Send + Sync {
    type Strategy: PushStrategy;

    fn for_path(&self, path: &StorePath) -> Self::Strategy;
}

impl<F, S> StrategyFactory for F
where
    F: Fn(&StorePath) -> S + Send + Sync,
    S: PushStrategy,
{
    type Strategy = S;

    fn for_path(&self, path: &StorePath) -> S {
        self(path)
    }
}

/// Strategy that accepts every default.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultStrategy;

impl PushStrategy for DefaultStrategy {}

//! Push engine for Nix binary caches.
//!
//! Streams NARs from the local store to a remote cache, verifying each NAR
//! against the store's recorded hash and submitting signed narinfos. The
//! local store and the remote cache are reached through the [`Store`] and
//! [`CacheApi`] traits; callers observe progress only through a
//! [`PushStrategy`].

pub mod api;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod push;
pub mod retry;
pub mod store;
pub mod strategy;

pub use api::{CacheApi, HttpCacheClient, NarBody, NarInfoStatus};
pub use error::{ApiError, PushError, PushResult, StoreError};
pub use executor::Concurrency;
pub use push::{
    ClosurePushReport, PushContext, push_closure, push_single_store_path, upload_store_path,
};
pub use retry::{RetryPolicy, RetryStatus, retry};
pub use store::{NarDump, NixStore, PathInfo, Store};
pub use strategy::{DefaultStrategy, PushOutcome, PushStrategy, StrategyFactory};

use ferry_core::config::{PushCache, PushSecret};
use ferry_core::store_path::{STORE_PATH_HASH_LEN, StoreDir, StorePath};
use ferry_push::{CacheApi, PushContext, RetryPolicy, Store};
use ferry_signer::NarInfoSigner;
use std::sync::Arc;
use std::time::Duration;

pub const TOKEN: &str = "push-token";

/// Fixtures live in `/store` rather than `/nix/store`.
pub fn store_dir() -> StoreDir {
    StoreDir::new("/store").unwrap()
}

/// `/store/<c repeated 32 times>-<name>`.
pub fn store_path(c: char, name: &str) -> StorePath {
    let hash: String = std::iter::repeat_n(c, STORE_PATH_HASH_LEN).collect();
    store_dir()
        .parse_path(&format!("/store/{hash}-{name}"))
        .unwrap()
}

pub fn cache() -> PushCache {
    PushCache::new("demo", PushSecret::Token(TOKEN.to_string()))
}

pub fn cache_with_key() -> (PushCache, NarInfoSigner) {
    let signer = NarInfoSigner::generate("demo-1");
    let cache = PushCache::new(
        "demo",
        PushSecret::TokenWithKey {
            token: TOKEN.to_string(),
            signing_key: signer.nix_secret_key(),
        },
    );
    (cache, signer)
}

/// Same attempt budget as the default policy, with millisecond backoff.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(1), RetryPolicy::DEFAULT_MAX_RETRIES)
}

pub fn context(api: Arc<dyn CacheApi>, store: Arc<dyn Store>, cache: PushCache) -> PushContext {
    PushContext::new(api, store, cache, fast_retry()).unwrap()
}

pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{cache, cache_with_key, context, fast_retry, store_dir, store_path};
#[allow(unused_imports)]
pub use mocks::{Event, EventLog, MockCacheApi, MockStore, RecordingStrategy};

//! Process environment helpers shared by unit tests.

use std::ffi::OsString;
use std::future::Future;
use std::sync::OnceLock;
use tokio::sync::Mutex;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Serialize tests that read or write process environment variables.
pub async fn with_env_lock<F, Fut, T>(action: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let _guard = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().await;
    action().await
}

/// Restores the previous value of a variable on drop.
pub struct EnvVarGuard {
    key: &'static str,
    prev: Option<OsString>,
}

impl EnvVarGuard {
    pub fn set(key: &'static str, value: &str) -> Self {
        let prev = std::env::var_os(key);
        // SAFETY: callers hold ENV_LOCK, so no other test touches the environment.
        unsafe { std::env::set_var(key, value) };
        Self { key, prev }
    }

    pub fn unset(key: &'static str) -> Self {
        let prev = std::env::var_os(key);
        // SAFETY: callers hold ENV_LOCK, so no other test touches the environment.
        unsafe { std::env::remove_var(key) };
        Self { key, prev }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        // SAFETY: callers hold ENV_LOCK, so no other test touches the environment.
        unsafe {
            if let Some(value) = self.prev.take() {
                std::env::set_var(self.key, value);
            } else {
                std::env::remove_var(self.key);
            }
        }
    }
}

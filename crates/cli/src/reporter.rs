//! Terminal progress for pushes.

use ferry_core::config::CompressionConfig;
use ferry_core::store_path::StorePath;
use ferry_push::{ApiError, PushError, PushOutcome, PushStrategy, RetryStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-session counters shared by every [`Reporter`].
#[derive(Debug, Default)]
pub struct Tally {
    uploaded: AtomicUsize,
    already_present: AtomicUsize,
    failed: AtomicUsize,
}

/// Snapshot of a [`Tally`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub uploaded: usize,
    pub already_present: usize,
    pub failed: usize,
}

impl Tally {
    pub fn summary(&self) -> Summary {
        Summary {
            uploaded: self.uploaded.load(Ordering::Relaxed),
            already_present: self.already_present.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl Summary {
    pub fn line(&self) -> String {
        format!(
            "Done: {} uploaded, {} already present, {} failed",
            self.uploaded, self.already_present, self.failed
        )
    }
}

/// Settings every reporter of a session shares.
#[derive(Clone, Debug)]
pub struct ReporterSettings {
    pub cache: String,
    pub compression: CompressionConfig,
    pub omit_deriver: bool,
    pub max_attempts: u32,
}

/// Prints one line per push event to stderr and counts outcomes.
pub struct Reporter {
    path: String,
    settings: Arc<ReporterSettings>,
    tally: Arc<Tally>,
}

impl Reporter {
    pub fn new(path: &StorePath, settings: Arc<ReporterSettings>, tally: Arc<Tally>) -> Self {
        Self {
            path: path.to_string(),
            settings,
            tally,
        }
    }

    fn already_present_line(&self) -> String {
        format!(
            "Skipping {} (already in {})",
            self.path, self.settings.cache
        )
    }

    fn attempt_line(&self, status: RetryStatus, nar_size: u64) -> String {
        if status.retries() == 0 {
            format!("Pushing {} ({})", self.path, format_bytes(nar_size))
        } else {
            format!(
                "Retrying {} ({}, attempt {}/{})",
                self.path,
                format_bytes(nar_size),
                status.attempt,
                self.settings.max_attempts
            )
        }
    }

    fn unauthorized_line(&self) -> String {
        format!(
            "Failed to push {}: unauthorized; check the auth token for cache {}",
            self.path, self.settings.cache
        )
    }

    fn error_line(&self, err: &PushError) -> String {
        format!("Failed to push {}: {err}", self.path)
    }

    fn done_line(&self) -> String {
        format!("Pushed {}", self.path)
    }
}

impl PushStrategy for Reporter {
    fn on_already_present(&self) {
        self.tally.already_present.fetch_add(1, Ordering::Relaxed);
        eprintln!("{}", self.already_present_line());
    }

    fn on_attempt(&self, status: RetryStatus, nar_size: u64) {
        eprintln!("{}", self.attempt_line(status, nar_size));
    }

    fn on_unauthorized(&self) -> Result<PushOutcome, PushError> {
        self.tally.failed.fetch_add(1, Ordering::Relaxed);
        eprintln!("{}", self.unauthorized_line());
        Err(PushError::Api(ApiError::Unauthorized))
    }

    fn on_error(&self, err: PushError) -> Result<PushOutcome, PushError> {
        self.tally.failed.fetch_add(1, Ordering::Relaxed);
        eprintln!("{}", self.error_line(&err));
        Err(err)
    }

    fn on_done(&self) {
        self.tally.uploaded.fetch_add(1, Ordering::Relaxed);
        eprintln!("{}", self.done_line());
    }

    fn compression(&self) -> CompressionConfig {
        self.settings.compression
    }

    fn omit_deriver(&self) -> bool {
        self.settings.omit_deriver
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    const TB: u64 = 1024 * GB;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

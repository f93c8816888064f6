//! Client configuration: file discovery, figment loading and flag overrides.

use anyhow::{Context, Result};
use ferry_core::config::PushConfig;
use ferry_core::narinfo::Compression;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "FERRY_CONFIG";

const ENV_PREFIX: &str = "FERRY_";

/// Resolve the config file path: explicit flag, then `FERRY_CONFIG`, then
/// `$XDG_CONFIG_HOME/ferry/config.toml` (falling back to `~/.config`).
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }

    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(path) => PathBuf::from(path),
        None => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| anyhow::anyhow!("HOME not set; set {CONFIG_ENV}"))?;
            PathBuf::from(home).join(".config")
        }
    };

    Ok(base.join("ferry").join("config.toml"))
}

/// Load the config file if it exists, then layer `FERRY_*` env vars on top.
///
/// Nested keys use `__`, e.g. `FERRY_CACHES__DEMO__AUTH_TOKEN`.
pub fn load_config(path: &Path) -> Result<PushConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        tracing::debug!(path = %path.display(), "Loading configuration file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!(path = %path.display(), "No configuration file");
    }

    figment
        .merge(
            Env::prefixed(ENV_PREFIX)
                .split("__")
                .ignore(&["config"]),
        )
        .extract()
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Values given on the command line. Unset fields leave the loaded config alone.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub host: Option<String>,
    pub jobs: Option<usize>,
    pub omit_deriver: bool,
    pub compression_method: Option<Compression>,
    pub compression_level: Option<i32>,
}

impl Overrides {
    pub fn apply(self, config: &mut PushConfig) {
        if let Some(host) = self.host {
            config.host = Some(host);
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if self.omit_deriver {
            config.omit_deriver = true;
        }
        if let Some(method) = self.compression_method {
            config.compression.method = method;
        }
        if let Some(level) = self.compression_level {
            config.compression.level = level;
        }
    }
}

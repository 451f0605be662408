//! Application configuration.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::overrides::MAPPING_FILE_NAME;

/// Directory name used under the platform config and cache directories.
pub const APP_DIR: &str = "dh-hltb";
/// Name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// Prefix for environment variable overrides, e.g. `DH_HLTB_CACHE_TTL_DAYS`.
pub const ENV_PREFIX: &str = "DH_HLTB";

const DEFAULT_CONFIG: &str = r#"# dh-hltb configuration
# Every key can also be set through a DH_HLTB_<KEY> environment variable.

# Where the resolution cache and log file are stored.
# cache_dir = "~/.cache/dh-hltb"

# Cached results older than this many days are fetched again. 0 refreshes everything.
cache_ttl_days = 30

# Pause after a failed match so the remote site is not hammered.
miss_backoff_ms = 1000

request_timeout_secs = 30
page_size = 20
"#;

/// Runtime settings for a reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding `cache.json` and the log file.
    pub cache_dir: PathBuf,
    /// Cache time-to-live in whole days.
    pub cache_ttl_days: i64,
    /// Override table location.
    pub mapping_path: PathBuf,
    /// Delay after every failed match, in milliseconds.
    pub miss_backoff_ms: u64,
    /// Search endpoint of the remote provider.
    pub search_url: String,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Number of search results requested per query.
    pub page_size: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            cache_ttl_days: 30,
            mapping_path: config_dir().join(MAPPING_FILE_NAME),
            miss_backoff_ms: 1000,
            search_url: "https://howlongtobeat.com/api/search".to_string(),
            user_agent: concat!(
                "Mozilla/5.0 (X11; Linux x86_64) dh-hltb/",
                env!("CARGO_PKG_VERSION")
            )
            .to_string(),
            request_timeout_secs: 30,
            page_size: 20,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file and environment.
    pub fn load() -> Result<Self> {
        Self::load_from(config_path())
    }

    /// Load configuration layered as defaults, then `path` (optional), then environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let defaults = Self::default();

        let settings = Config::builder()
            .set_default("cache_dir", defaults.cache_dir.to_string_lossy().to_string())?
            .set_default("cache_ttl_days", defaults.cache_ttl_days)?
            .set_default(
                "mapping_path",
                defaults.mapping_path.to_string_lossy().to_string(),
            )?
            .set_default("miss_backoff_ms", defaults.miss_backoff_ms as i64)?
            .set_default("search_url", defaults.search_url)?
            .set_default("user_agent", defaults.user_agent)?
            .set_default("request_timeout_secs", defaults.request_timeout_secs as i64)?
            .set_default("page_size", defaults.page_size as i64)?
            .add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;

        let mut config: Self = settings
            .try_deserialize()
            .context("invalid configuration")?;
        config.cache_dir = expand_home(&config.cache_dir);
        config.mapping_path = expand_home(&config.mapping_path);
        Ok(config)
    }

    /// Backoff applied after a failed match.
    pub fn miss_backoff(&self) -> Duration {
        Duration::from_millis(self.miss_backoff_ms)
    }

    /// Location of the run log.
    pub fn log_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{APP_DIR}.log"))
    }
}

/// Platform configuration directory for the application.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Default configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

/// Default cache directory, `~/.cache/dh-hltb` on Linux.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join(APP_DIR)
}

/// Write a commented default configuration file if none exists yet.
pub fn ensure_default_config() -> Result<PathBuf> {
    let path = config_path();
    write_default_config(&path)?;
    Ok(path)
}

fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("failed to write default config {}", path.display()))
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

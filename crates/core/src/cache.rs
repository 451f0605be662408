//! Persistent cache of remote resolutions keyed by local identity.

use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::models::{LocalRecord, Playtimes};

/// File name of the cache inside the cache directory.
pub const CACHE_FILE_NAME: &str = "cache.json";

/// Cached entries keyed by local identity.
pub type CacheMap = BTreeMap<String, CacheEntry>;

/// Snapshot of the remote-derived fields of one record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Local title, stored only to keep the file readable.
    #[serde(default)]
    pub title: String,
    /// Matched remote identifier.
    #[serde(default)]
    pub remote_identity: Option<String>,
    /// Playtimes copied from the match.
    #[serde(flatten)]
    pub playtimes: Playtimes,
    /// When the match was fetched.
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Capture the cacheable fields of a record, or `None` if there is nothing to keep.
    pub fn from_record(record: &LocalRecord) -> Option<Self> {
        if !record.has_resolution() {
            return None;
        }
        Some(Self {
            title: record.title.clone(),
            remote_identity: record.remote_identity.clone(),
            playtimes: record.playtimes,
            resolved_at: record.resolved_at,
        })
    }

    /// Copy the cached fields onto a record.
    pub fn apply_to(&self, record: &mut LocalRecord) {
        record.remote_identity = self.remote_identity.clone();
        record.playtimes = self.playtimes;
        record.resolved_at = self.resolved_at;
    }
}

/// Whether a resolution stamped at `resolved_at` must be fetched again.
///
/// A missing timestamp or a non-positive TTL is always stale. Otherwise the
/// entry is stale once strictly more than `ttl_days` have elapsed.
pub fn is_stale(resolved_at: Option<DateTime<Utc>>, ttl_days: i64, now: DateTime<Utc>) -> bool {
    let Some(resolved_at) = resolved_at else {
        return true;
    };
    if ttl_days <= 0 {
        return true;
    }
    now.signed_duration_since(resolved_at) > Duration::days(ttl_days)
}

/// Reads and writes the cache file.
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
    ttl_days: i64,
}

impl CacheStore {
    /// Create a store for `cache_dir/cache.json` with the given TTL.
    pub fn new(cache_dir: impl AsRef<Path>, ttl_days: i64) -> Self {
        Self {
            path: cache_dir.as_ref().join(CACHE_FILE_NAME),
            ttl_days,
        }
    }

    /// Location of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured TTL in days.
    pub fn ttl_days(&self) -> i64 {
        self.ttl_days
    }

    /// Whether a timestamp is stale under this store's TTL.
    pub fn is_stale(&self, resolved_at: Option<DateTime<Utc>>) -> bool {
        is_stale(resolved_at, self.ttl_days, Utc::now())
    }

    /// Load the cache, dropping entries that are already stale.
    pub fn load(&self) -> Result<CacheMap> {
        self.load_at(Utc::now())
    }

    /// Load the cache as of `now`.
    pub fn load_at(&self, now: DateTime<Utc>) -> Result<CacheMap> {
        info!("loading cache from {}", self.path.display());
        if !self.path.exists() {
            info!("cache file not found, starting empty");
            return Ok(CacheMap::new());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read cache {}", self.path.display()))?;
        let mut entries: CacheMap = if contents.trim().is_empty() {
            CacheMap::new()
        } else {
            serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse cache {}", self.path.display()))?
        };

        let before = entries.len();
        entries.retain(|_, entry| !is_stale(entry.resolved_at, self.ttl_days, now));
        debug!("pruned {} stale cache entries", before - entries.len());
        info!("cache loaded ({} entries)", entries.len());
        Ok(entries)
    }

    /// Atomically write the cache, creating the directory if needed.
    pub fn save(&self, entries: &CacheMap) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache directory {}", parent.display()))?;

        let serialized =
            serde_json::to_vec_pretty(entries).context("failed to serialize cache")?;
        let mut file = NamedTempFile::new_in(parent)
            .with_context(|| format!("failed to create temporary file in {}", parent.display()))?;
        file.write_all(&serialized)
            .context("failed to write temporary cache file")?;
        file.as_file()
            .sync_all()
            .context("failed to flush temporary cache file")?;
        file.persist(&self.path)
            .with_context(|| format!("failed to replace cache {}", self.path.display()))?;

        info!("cache saved to {}", self.path.display());
        Ok(())
    }
}

/// Fill records from cached entries.
pub fn apply_entries(entries: &CacheMap, records: &mut [LocalRecord]) {
    for record in records.iter_mut() {
        if let Some(entry) = entries.get(&record.identity) {
            entry.apply_to(record);
        }
    }
}

/// Fold the current state of `records` into `entries`, skipping records with
/// nothing worth caching.
pub fn collect_entries(entries: &mut CacheMap, records: &[LocalRecord]) {
    for record in records {
        if let Some(entry) = CacheEntry::from_record(record) {
            entries.insert(record.identity.clone(), entry);
        }
    }
}

//! Driving a full reconciliation run.

use std::{future::Future, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info};

use crate::{
    cache::{self, CacheMap, CacheStore},
    config::AppConfig,
    error::RunError,
    merge,
    models::LocalRecord,
    overrides::OverrideRegistry,
    provider::SearchProvider,
    resolver::{Resolution, Resolver},
};

/// Per-run switches.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Resolve ignored games too.
    pub include_ignored: bool,
    /// Pause after every failed match.
    pub miss_backoff: Duration,
}

impl RunOptions {
    /// Options taken from configuration.
    pub fn from_config(config: &AppConfig, include_ignored: bool) -> Self {
        Self {
            include_ignored,
            miss_backoff: config.miss_backoff(),
        }
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Records visited so far.
    pub processed: usize,
    /// Skipped because they are on the ignore list.
    pub ignored: usize,
    /// Skipped because the cached data is still fresh.
    pub fresh: usize,
    /// Newly matched.
    pub resolved: usize,
    /// Searched but not matched, force-included ignored games too.
    pub failed: usize,
}

/// What to do with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// On the ignore list and not force-included.
    Ignored,
    /// Cached data is recent enough.
    Fresh,
    /// Needs a remote lookup.
    NeedsResolve,
}

/// Decide how a record is handled in this run.
pub fn classify(
    record: &LocalRecord,
    overrides: &OverrideRegistry,
    store: &CacheStore,
    include_ignored: bool,
) -> RecordState {
    if overrides.is_ignored(&record.identity) && !include_ignored {
        RecordState::Ignored
    } else if !store.is_stale(record.resolved_at) {
        RecordState::Fresh
    } else {
        RecordState::NeedsResolve
    }
}

/// Owns the records and cache for one run and resolves them in order.
pub struct Orchestrator {
    provider: Box<dyn SearchProvider>,
    overrides: OverrideRegistry,
    store: CacheStore,
    entries: CacheMap,
    records: Vec<LocalRecord>,
    options: RunOptions,
    summary: RunSummary,
    saved: bool,
}

impl Orchestrator {
    /// Load cache and overrides, merge the raw rows and apply cached data.
    pub fn prepare(
        config: &AppConfig,
        options: RunOptions,
        provider: Box<dyn SearchProvider>,
        raw_records: Vec<LocalRecord>,
    ) -> Result<Self> {
        let store = CacheStore::new(&config.cache_dir, config.cache_ttl_days);
        let entries = store.load()?;
        let overrides = OverrideRegistry::load(&config.mapping_path)?;
        let records = merge::merge_records(raw_records).context("failed to merge input rows")?;
        Ok(Self::new(provider, overrides, store, entries, records, options))
    }

    /// Assemble an orchestrator from already loaded parts.
    ///
    /// Records marked neither as wanted nor as finished are dropped.
    pub fn new(
        provider: Box<dyn SearchProvider>,
        overrides: OverrideRegistry,
        store: CacheStore,
        entries: CacheMap,
        mut records: Vec<LocalRecord>,
        options: RunOptions,
    ) -> Self {
        records.retain(LocalRecord::is_tracked);
        cache::apply_entries(&entries, &mut records);
        Self {
            provider,
            overrides,
            store,
            entries,
            records,
            options,
            summary: RunSummary::default(),
            saved: false,
        }
    }

    /// Records in input order, enriched as far as the run got.
    pub fn records(&self) -> &[LocalRecord] {
        &self.records
    }

    /// Override table in use.
    pub fn overrides(&self) -> &OverrideRegistry {
        &self.overrides
    }

    /// Counters so far.
    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Resolve every record that needs it, stopping on connection failure.
    pub async fn run(&mut self) -> Result<RunSummary, RunError> {
        if self.store.ttl_days() <= 0 {
            info!("forcing refresh of all titles");
        }

        let resolver = Resolver::new(
            self.provider.as_ref(),
            &self.overrides,
            self.options.miss_backoff,
        );
        let total = self.records.len();
        let width = total.to_string().len();

        for (index, record) in self.records.iter_mut().enumerate() {
            let progress = format!("({:>width$}/{total})", index + 1);
            self.summary.processed += 1;
            self.saved = false;

            match classify(record, &self.overrides, &self.store, self.options.include_ignored) {
                RecordState::Ignored => {
                    info!("{progress} ignored: {}", record.title);
                    self.summary.ignored += 1;
                }
                RecordState::Fresh => {
                    info!("{progress} up to date: {}", record.title);
                    self.summary.fresh += 1;
                }
                RecordState::NeedsResolve => match resolver.resolve(record, &progress).await? {
                    Resolution::Accepted(candidate) => {
                        record.apply_candidate(&candidate, Utc::now());
                        self.summary.resolved += 1;
                    }
                    Resolution::NoMatch { .. } => self.summary.failed += 1,
                },
            }
        }

        info!(
            "processed {} games ({} resolved, {} up to date, {} ignored, {} without match)",
            self.summary.processed,
            self.summary.resolved,
            self.summary.fresh,
            self.summary.ignored,
            self.summary.failed
        );
        Ok(self.summary)
    }

    /// Run until finished or until `shutdown` completes, whichever comes first.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<RunSummary, RunError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = shutdown => Err(RunError::Cancelled),
            result = self.run() => result,
        }
    }

    /// Fold the current records into the cache and write it out.
    pub fn save_cache(&mut self) -> Result<()> {
        info!("saving cache ...");
        cache::collect_entries(&mut self.entries, &self.records);
        self.store.save(&self.entries)?;
        self.saved = true;
        Ok(())
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if self.saved {
            return;
        }
        if let Err(err) = self.save_cache() {
            error!("failed to save cache: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{HashMap, HashSet},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use tempfile::tempdir;

    use super::*;
    use crate::{
        cache::CacheEntry,
        error::ProviderError,
        models::{Playtimes, RemoteCandidate},
    };

    /// Returns an exact match for every query, counting calls.
    struct Echo {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SearchProvider for Echo {
        async fn search(&self, title: &str) -> Result<Vec<RemoteCandidate>, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![RemoteCandidate {
                remote_identity: format!("remote-{call}"),
                name: title.to_string(),
                alias: None,
                similarity: 1.0,
                playtimes: Playtimes {
                    main_hours: Some(12.0),
                    ..Playtimes::default()
                },
                release_year: None,
            }])
        }
    }

    fn options() -> RunOptions {
        RunOptions {
            include_ignored: false,
            miss_backoff: Duration::ZERO,
        }
    }

    fn wanted(identity: &str) -> LocalRecord {
        LocalRecord {
            wants_to_play: Some(true),
            ..LocalRecord::new(identity, format!("Game {identity}"))
        }
    }

    #[tokio::test]
    async fn skips_ignored_and_fresh_records() -> Result<()> {
        let dir = tempdir()?;
        let store = CacheStore::new(dir.path(), 30);
        let mut entries = CacheMap::new();
        entries.insert(
            "2".to_string(),
            CacheEntry {
                title: "Game 2".to_string(),
                remote_identity: Some("r2".to_string()),
                playtimes: Playtimes::default(),
                resolved_at: Some(Utc::now() - ChronoDuration::days(1)),
            },
        );
        let overrides =
            OverrideRegistry::new(HashMap::new(), HashSet::from(["3".to_string()]));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut orchestrator = Orchestrator::new(
            Box::new(Echo { calls: calls.clone() }),
            overrides,
            store,
            entries,
            vec![wanted("1"), wanted("2"), wanted("3")],
            options(),
        );
        let summary = orchestrator.run().await.expect("run succeeds");

        assert_eq!(
            summary,
            RunSummary {
                processed: 3,
                ignored: 1,
                fresh: 1,
                resolved: 1,
                failed: 0,
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.records()[0].remote_identity.as_deref(), Some("remote-0"));
        assert_eq!(orchestrator.records()[1].remote_identity.as_deref(), Some("r2"));
        Ok(())
    }

    #[tokio::test]
    async fn include_ignored_resolves_them() -> Result<()> {
        let dir = tempdir()?;
        let overrides =
            OverrideRegistry::new(HashMap::new(), HashSet::from(["1".to_string()]));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut orchestrator = Orchestrator::new(
            Box::new(Echo { calls: calls.clone() }),
            overrides,
            CacheStore::new(dir.path(), 30),
            CacheMap::new(),
            vec![wanted("1")],
            RunOptions {
                include_ignored: true,
                ..options()
            },
        );
        let summary = orchestrator.run().await.expect("run succeeds");
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.ignored, 0);
        Ok(())
    }

    struct Empty;

    #[async_trait]
    impl SearchProvider for Empty {
        async fn search(&self, _title: &str) -> Result<Vec<RemoteCandidate>, ProviderError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn unmatched_ignored_record_counts_as_failed() -> Result<()> {
        let dir = tempdir()?;
        let overrides =
            OverrideRegistry::new(HashMap::new(), HashSet::from(["1".to_string()]));
        let mut orchestrator = Orchestrator::new(
            Box::new(Empty),
            overrides,
            CacheStore::new(dir.path(), 30),
            CacheMap::new(),
            vec![wanted("1"), wanted("2")],
            RunOptions {
                include_ignored: true,
                ..options()
            },
        );
        let summary = orchestrator.run().await?;
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(
            summary.processed,
            summary.ignored + summary.fresh + summary.resolved + summary.failed
        );
        Ok(())
    }

    #[tokio::test]
    async fn untracked_records_are_dropped() -> Result<()> {
        let dir = tempdir()?;
        let calls = Arc::new(AtomicUsize::new(0));
        let shelved = LocalRecord {
            wants_to_play: Some(false),
            finished: Some(false),
            owned: Some(true),
            ..LocalRecord::new("9", "Shelved")
        };
        let mut orchestrator = Orchestrator::new(
            Box::new(Echo { calls: calls.clone() }),
            OverrideRegistry::default(),
            CacheStore::new(dir.path(), 30),
            CacheMap::new(),
            vec![shelved, wanted("1"), LocalRecord::new("10", "Bare")],
            options(),
        );
        assert_eq!(orchestrator.records().len(), 1);

        let summary = orchestrator.run().await?;
        assert_eq!(summary.processed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_cancels_and_drop_saves() -> Result<()> {
        let dir = tempdir()?;
        let store = CacheStore::new(dir.path(), 30);
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let mut orchestrator = Orchestrator::new(
                Box::new(Echo { calls }),
                OverrideRegistry::default(),
                store.clone(),
                CacheMap::new(),
                vec![wanted("1")],
                RunOptions {
                    include_ignored: false,
                    miss_backoff: Duration::from_secs(60),
                },
            );
            let result = orchestrator.run_until(std::future::ready(())).await;
            assert!(matches!(result, Err(RunError::Cancelled)));
        }
        assert!(store.path().exists());
        Ok(())
    }
}

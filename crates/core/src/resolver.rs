//! Turning remote search results into at most one confident match.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::{
    error::RunError,
    models::{LocalRecord, RemoteCandidate},
    overrides::OverrideRegistry,
    provider::SearchProvider,
};

/// Why a record could not be matched.
#[derive(Debug, Clone, PartialEq)]
pub enum NoMatchReason {
    /// The provider found nothing, even for the normalized title.
    NoResults,
    /// The two best candidates share the same similarity.
    Ambiguous,
    /// A forced remote id matched this many candidates instead of exactly one.
    OverrideCount(usize),
    /// The best candidate's name does not correspond to the local title.
    TitleMismatch,
}

/// Result of resolving one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A single candidate was accepted.
    Accepted(RemoteCandidate),
    /// No confident match; the candidates considered are kept for reporting.
    NoMatch {
        /// Why the candidates were rejected.
        reason: NoMatchReason,
        /// Candidates in ranked order.
        candidates: Vec<RemoteCandidate>,
    },
}

impl Resolution {
    /// The accepted candidate, if any.
    pub fn accepted(&self) -> Option<&RemoteCandidate> {
        match self {
            Resolution::Accepted(candidate) => Some(candidate),
            Resolution::NoMatch { .. } => None,
        }
    }
}

/// Characters the remote search handles badly; replaced by spaces on fallback.
const CONFUSING_PUNCTUATION: &[char] = &[':', '\u{2013}', '\u{2014}', '-'];

static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("invalid whitespace regex"));

/// Replace punctuation that confuses the provider with spaces and collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|ch| if CONFUSING_PUNCTUATION.contains(&ch) { ' ' } else { ch })
        .collect();
    WHITESPACE_RE.replace_all(replaced.trim(), " ").into_owned()
}

/// Key for loose title comparison: lowercase, punctuation dropped, whitespace collapsed.
pub fn comparison_key(title: &str) -> String {
    let replaced: String = title
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_alphanumeric() { ch } else { ' ' })
        .collect();
    WHITESPACE_RE.replace_all(replaced.trim(), " ").into_owned()
}

/// How a candidate's names relate to a local title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleMatch {
    /// Name or alias equals the title.
    Exact,
    /// Only the loose comparison matched.
    Loose,
    /// Nothing matched.
    None,
}

/// Compare a candidate's name and alias against a local title.
pub fn match_title(candidate: &RemoteCandidate, title: &str) -> TitleMatch {
    let names = [Some(candidate.name.as_str()), candidate.alias.as_deref()];
    if names.iter().flatten().any(|name| *name == title) {
        return TitleMatch::Exact;
    }
    let key = comparison_key(title);
    if !key.is_empty() && names.iter().flatten().any(|name| comparison_key(name) == key) {
        return TitleMatch::Loose;
    }
    TitleMatch::None
}

/// Rank candidates by similarity, best first. Ties keep provider order.
pub fn rank_candidates(candidates: &mut [RemoteCandidate]) {
    candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
}

/// Pick the single candidate carrying `remote_identity`.
pub fn select_forced(
    candidates: Vec<RemoteCandidate>,
    remote_identity: &str,
) -> Result<RemoteCandidate, (NoMatchReason, Vec<RemoteCandidate>)> {
    let matches: Vec<&RemoteCandidate> = candidates
        .iter()
        .filter(|candidate| candidate.remote_identity == remote_identity)
        .collect();
    match matches.as_slice() {
        [only] => Ok((*only).clone()),
        _ => {
            let count = matches.len();
            Err((NoMatchReason::OverrideCount(count), candidates))
        }
    }
}

/// Apply the free-text acceptance policy to ranked candidates.
pub fn select_best(
    candidates: Vec<RemoteCandidate>,
    title: &str,
) -> Result<(RemoteCandidate, TitleMatch), (NoMatchReason, Vec<RemoteCandidate>)> {
    let Some(best) = candidates.first() else {
        return Err((NoMatchReason::NoResults, candidates));
    };
    if let Some(runner_up) = candidates.get(1) {
        if runner_up.similarity == best.similarity {
            return Err((NoMatchReason::Ambiguous, candidates));
        }
    }
    match match_title(best, title) {
        TitleMatch::None => Err((NoMatchReason::TitleMismatch, candidates)),
        quality => Ok((best.clone(), quality)),
    }
}

/// Resolves local records against a search provider.
pub struct Resolver<'a> {
    provider: &'a dyn SearchProvider,
    overrides: &'a OverrideRegistry,
    miss_backoff: Duration,
}

impl<'a> Resolver<'a> {
    /// Create a resolver.
    pub fn new(
        provider: &'a dyn SearchProvider,
        overrides: &'a OverrideRegistry,
        miss_backoff: Duration,
    ) -> Self {
        Self {
            provider,
            overrides,
            miss_backoff,
        }
    }

    /// Search for `record` and decide on a match.
    ///
    /// Provider failures abort with [`RunError::Connection`]; everything else
    /// ends in a [`Resolution`].
    pub async fn resolve(&self, record: &LocalRecord, progress: &str) -> Result<Resolution, RunError> {
        let rule = self.overrides.rule(&record.identity);
        let (query, forced_id) = match rule {
            Some(rule) => {
                info!("{progress} looking up: {} (custom mapping)", record.title);
                (rule.title.as_str(), Some(rule.remote_identity.as_str()))
            }
            None => {
                info!("{progress} looking up: {}", record.title);
                (record.title.as_str(), None)
            }
        };

        let mut candidates = self.search(query).await?;
        if candidates.is_empty() {
            let fallback = normalize_title(query);
            if fallback != query && !fallback.is_empty() {
                info!("no results, retrying as {fallback:?}");
                candidates = self.search(&fallback).await?;
            }
        }
        rank_candidates(&mut candidates);

        let selected = match forced_id {
            Some(forced_id) => select_forced(candidates, forced_id),
            None => select_best(candidates, &record.title).map(|(candidate, quality)| {
                if quality == TitleMatch::Loose {
                    info!(
                        "accepted loose match {:?} for {:?} (remote id {})",
                        candidate.name, record.title, candidate.remote_identity
                    );
                }
                candidate
            }),
        };

        match selected {
            Ok(candidate) => Ok(Resolution::Accepted(candidate)),
            Err((reason, candidates)) => {
                self.report_miss(record, &reason, &candidates);
                if !self.miss_backoff.is_zero() {
                    tokio::time::sleep(self.miss_backoff).await;
                }
                Ok(Resolution::NoMatch { reason, candidates })
            }
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<RemoteCandidate>, RunError> {
        self.provider
            .search(query)
            .await
            .map_err(|source| RunError::Connection {
                title: query.to_string(),
                source,
            })
    }

    fn report_miss(&self, record: &LocalRecord, reason: &NoMatchReason, candidates: &[RemoteCandidate]) {
        let headline = match reason {
            NoMatchReason::NoResults => "no results".to_string(),
            NoMatchReason::Ambiguous => "ambiguous results".to_string(),
            NoMatchReason::OverrideCount(count) => {
                format!("expected exactly one result with the mapped id, got {count}")
            }
            NoMatchReason::TitleMismatch => "no exact match".to_string(),
        };
        let dump = candidates
            .iter()
            .map(RemoteCandidate::describe)
            .collect::<Vec<_>>()
            .join("\n\n");

        if self.overrides.is_ignored(&record.identity) {
            info!("IGNORED: {headline} (local id {})", record.identity);
            if !dump.is_empty() {
                info!("candidates:\n{dump}");
            }
        } else {
            warn!("{headline} (local id {})", record.identity);
            if !dump.is_empty() {
                warn!("candidates:\n{dump}");
            }
        }
    }
}

//! Shared domain models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Playtime estimates in hours, as reported by the remote catalog.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Playtimes {
    /// Main story.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_hours: Option<f64>,
    /// Main story plus extras.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_hours: Option<f64>,
    /// Completionist run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completionist_hours: Option<f64>,
    /// Average across all play styles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_styles_hours: Option<f64>,
}

impl Playtimes {
    /// True when no estimate is known.
    pub fn is_empty(&self) -> bool {
        self.main_hours.is_none()
            && self.extra_hours.is_none()
            && self.completionist_hours.is_none()
            && self.all_styles_hours.is_none()
    }
}

/// One game from the local collection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocalRecord {
    /// Stable identifier assigned by the source catalog.
    pub identity: String,
    /// Title as shown in the source catalog.
    pub title: String,
    /// Release year, when the source lists one.
    #[serde(default)]
    pub release_year: Option<i32>,
    /// Marked as "want to play".
    #[serde(default)]
    pub wants_to_play: Option<bool>,
    /// Marked as finished.
    #[serde(default)]
    pub finished: Option<bool>,
    /// Marked as owned.
    #[serde(default)]
    pub owned: Option<bool>,
    /// Date the game was finished, if recorded.
    #[serde(default)]
    pub finished_on: Option<NaiveDate>,
    /// Identifier of the matched remote catalog entry.
    #[serde(default)]
    pub remote_identity: Option<String>,
    /// Playtimes copied from the matched remote entry.
    #[serde(flatten)]
    pub playtimes: Playtimes,
    /// When the remote data was last fetched.
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl LocalRecord {
    /// Create a bare record with only identity and title set.
    pub fn new(identity: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    /// Whether the record takes part in processing at all.
    pub fn is_tracked(&self) -> bool {
        self.wants_to_play == Some(true) || self.finished == Some(true)
    }

    /// Whether any remote-derived field is set.
    pub fn has_resolution(&self) -> bool {
        self.remote_identity.is_some() || !self.playtimes.is_empty() || self.resolved_at.is_some()
    }

    /// Copy an accepted candidate into the record and stamp the resolution time.
    pub fn apply_candidate(&mut self, candidate: &RemoteCandidate, now: DateTime<Utc>) {
        self.remote_identity = Some(candidate.remote_identity.clone());
        self.playtimes = candidate.playtimes;
        self.resolved_at = Some(now);
    }
}

/// One search hit returned by the remote provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCandidate {
    /// Remote catalog identifier.
    pub remote_identity: String,
    /// Canonical name.
    pub name: String,
    /// Alternative name, if any.
    pub alias: Option<String>,
    /// Similarity to the query, 0.0 - 1.0.
    pub similarity: f64,
    /// Playtime estimates.
    pub playtimes: Playtimes,
    /// Release year.
    pub release_year: Option<i32>,
}

impl RemoteCandidate {
    /// Multi-line description used when dumping candidates for manual correction.
    pub fn describe(&self) -> String {
        let alias = self
            .alias
            .as_deref()
            .filter(|value| !value.is_empty())
            .map(|value| format!(" (alias: {value})"))
            .unwrap_or_default();
        format!(
            "    name: {}{}\n    remote id: {}\n    similarity: {}",
            self.name, alias, self.remote_identity, self.similarity
        )
    }
}

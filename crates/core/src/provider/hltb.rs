use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::SearchProvider;
use crate::{
    config::AppConfig,
    error::ProviderError,
    models::{Playtimes, RemoteCandidate},
};

const SITE_ROOT: &str = "https://howlongtobeat.com";
const MAX_ERROR_BODY: usize = 512;

/// Raw search response.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<HltbGame>,
}

#[derive(Debug, Deserialize)]
struct HltbGame {
    game_id: u64,
    game_name: String,
    #[serde(default)]
    game_alias: Option<String>,
    /// Durations are reported in seconds.
    #[serde(default)]
    comp_main: Option<f64>,
    #[serde(default)]
    comp_plus: Option<f64>,
    #[serde(default)]
    comp_100: Option<f64>,
    #[serde(default)]
    comp_all: Option<f64>,
    #[serde(default)]
    release_world: Option<i32>,
}

/// Async client for the HowLongToBeat search endpoint.
pub struct HltbClient {
    http_client: reqwest::Client,
    search_url: String,
    page_size: u32,
}

impl HltbClient {
    /// Build a client from application configuration.
    pub fn new(config: &AppConfig) -> Result<Self, ProviderError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::REFERER, header::HeaderValue::from_static(SITE_ROOT));
        headers.insert(header::ORIGIN, header::HeaderValue::from_static(SITE_ROOT));

        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            search_url: config.search_url.clone(),
            page_size: config.page_size,
        })
    }

    fn payload(&self, title: &str) -> serde_json::Value {
        let terms: Vec<&str> = title.split_whitespace().collect();
        json!({
            "searchType": "games",
            "searchTerms": terms,
            "searchPage": 1,
            "size": self.page_size,
            "searchOptions": {
                "games": {
                    "userId": 0,
                    "platform": "",
                    "sortCategory": "popular",
                    "rangeCategory": "main",
                    "rangeTime": { "min": null, "max": null },
                    "gameplay": { "perspective": "", "flow": "", "genre": "", "difficulty": "" },
                    "rangeYear": { "min": "", "max": "" },
                    "modifier": ""
                },
                "users": { "sortCategory": "postcount" },
                "lists": { "sortCategory": "follows" },
                "filter": "",
                "sort": 0,
                "randomizer": 0
            },
            "useCache": true
        })
    }
}

#[async_trait]
impl SearchProvider for HltbClient {
    async fn search(&self, title: &str) -> Result<Vec<RemoteCandidate>, ProviderError> {
        debug!(title = %title, url = %self.search_url, "querying HowLongToBeat");

        let response = self
            .http_client
            .post(&self.search_url)
            .json(&self.payload(title))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(MAX_ERROR_BODY);
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        parse_candidates(title, &body)
    }
}

/// Decode a search response body into candidates scored against `query`.
pub fn parse_candidates(query: &str, body: &str) -> Result<Vec<RemoteCandidate>, ProviderError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

    Ok(response
        .data
        .into_iter()
        .map(|game| {
            let alias = game
                .game_alias
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty());
            RemoteCandidate {
                remote_identity: game.game_id.to_string(),
                similarity: similarity(query, &game.game_name, alias.as_deref()),
                name: game.game_name,
                alias,
                playtimes: Playtimes {
                    main_hours: seconds_to_hours(game.comp_main),
                    extra_hours: seconds_to_hours(game.comp_plus),
                    completionist_hours: seconds_to_hours(game.comp_100),
                    all_styles_hours: seconds_to_hours(game.comp_all),
                },
                release_year: game.release_world.filter(|year| *year > 0),
            }
        })
        .collect())
}

/// Similarity of the query to a candidate, the better of name and alias.
pub fn similarity(query: &str, name: &str, alias: Option<&str>) -> f64 {
    let query = query.to_lowercase();
    let score = |candidate: &str| strsim::normalized_levenshtein(&query, &candidate.to_lowercase());
    let name_score = score(name);
    let best = alias
        .map(score)
        .map_or(name_score, |alias_score| alias_score.max(name_score));
    round2(best)
}

fn seconds_to_hours(seconds: Option<f64>) -> Option<f64> {
    seconds
        .filter(|value| *value > 0.0)
        .map(|value| round2(value / 3600.0))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

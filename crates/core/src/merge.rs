//! Collapsing duplicate collection rows into one record per game.

use std::collections::HashMap;

use tracing::info;

use crate::{
    error::MergeError,
    models::{LocalRecord, Playtimes},
};

/// Merge two records describing the same game.
///
/// Every field keeps the value from `first` unless it is unset there, in which
/// case the value from `second` is used.
pub fn merge_pair(first: &LocalRecord, second: &LocalRecord) -> Result<LocalRecord, MergeError> {
    if first.identity != second.identity {
        return Err(MergeError::IdentityMismatch {
            left: first.identity.clone(),
            left_title: first.title.clone(),
            right: second.identity.clone(),
            right_title: second.title.clone(),
        });
    }

    let title = if first.title.is_empty() {
        second.title.clone()
    } else {
        first.title.clone()
    };

    Ok(LocalRecord {
        identity: first.identity.clone(),
        title,
        release_year: first.release_year.or(second.release_year),
        wants_to_play: first.wants_to_play.or(second.wants_to_play),
        finished: first.finished.or(second.finished),
        owned: first.owned.or(second.owned),
        finished_on: first.finished_on.or(second.finished_on),
        remote_identity: first
            .remote_identity
            .clone()
            .or_else(|| second.remote_identity.clone()),
        playtimes: Playtimes {
            main_hours: first.playtimes.main_hours.or(second.playtimes.main_hours),
            extra_hours: first.playtimes.extra_hours.or(second.playtimes.extra_hours),
            completionist_hours: first
                .playtimes
                .completionist_hours
                .or(second.playtimes.completionist_hours),
            all_styles_hours: first
                .playtimes
                .all_styles_hours
                .or(second.playtimes.all_styles_hours),
        },
        resolved_at: first.resolved_at.or(second.resolved_at),
    })
}

/// Merge a stream of records by identity, keeping first-seen order.
pub fn merge_records<I>(records: I) -> Result<Vec<LocalRecord>, MergeError>
where
    I: IntoIterator<Item = LocalRecord>,
{
    let mut merged: Vec<LocalRecord> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for record in records {
        match positions.get(&record.identity) {
            Some(&index) => {
                merged[index] = merge_pair(&merged[index], &record)?;
            }
            None => {
                positions.insert(record.identity.clone(), merged.len());
                merged.push(record);
            }
        }
    }

    info!("collected {} games in total", merged.len());
    Ok(merged)
}

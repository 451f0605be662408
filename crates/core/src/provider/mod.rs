//! Remote search providers.

/// HowLongToBeat HTTP client.
pub mod hltb;

use async_trait::async_trait;

use crate::{error::ProviderError, models::RemoteCandidate};

pub use hltb::HltbClient;

/// Anything that can turn a title into a list of candidate matches.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Search the remote catalog for `title`.
    ///
    /// An empty list means the provider answered but found nothing; an error
    /// means it could not be reached or answered garbage.
    async fn search(&self, title: &str) -> Result<Vec<RemoteCandidate>, ProviderError>;
}

//! Error types shared across the crate.

use thiserror::Error;

/// Raised when two records that do not describe the same game are merged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    /// The two records carry different identities.
    #[error("refusing to merge different games: {left:?} ({left_title}) and {right:?} ({right_title})")]
    IdentityMismatch {
        /// Identity of the record being merged into.
        left: String,
        /// Title of the record being merged into.
        left_title: String,
        /// Identity of the record being merged in.
        right: String,
        /// Title of the record being merged in.
        right_title: String,
    },
}

/// Failure talking to the remote search provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure (DNS, TLS, timeout, ...).
    #[error("network error: {0}")]
    Network(String),
    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Conditions that end a run early.
#[derive(Debug, Error)]
pub enum RunError {
    /// The provider could not be reached; the run must stop.
    #[error("connection failure while searching for {title:?}")]
    Connection {
        /// Query that was being searched.
        title: String,
        /// Underlying provider failure.
        #[source]
        source: ProviderError,
    },
    /// The user interrupted the run.
    #[error("interrupted by user")]
    Cancelled,
}

#![warn(clippy::all, missing_docs)]

//! Core logic for reconciling a databaze-her.cz game collection with
//! HowLongToBeat playtimes.
//!
//! This crate hosts the data models, configuration handling, source
//! extraction, the resolution cache, match selection and export used by
//! the command line frontend.

pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod merge;
pub mod models;
pub mod orchestrator;
pub mod overrides;
pub mod provider;
pub mod resolver;
pub mod source;

pub use cache::{CacheEntry, CacheStore};
pub use config::AppConfig;
pub use error::{MergeError, ProviderError, RunError};
pub use models::{LocalRecord, Playtimes, RemoteCandidate};
pub use orchestrator::{Orchestrator, RunOptions, RunSummary};
pub use overrides::{OverrideRegistry, OverrideRule};
pub use provider::{HltbClient, SearchProvider};
pub use resolver::{Resolution, Resolver};

//! Crawl orchestration
//!
//! - [`rate_limit`] - header-driven sliding-log rate limiter
//! - [`retry`] - credential remediation loop around a whole crawl
//! - [`progress`] - timeline-based progress display
//! - [`driver`] - sweep planning for single and continuous runs

pub mod config;
pub mod driver;
pub mod progress;
pub mod rate_limit;
pub mod retry;

pub use driver::{CrawlDriver, CrawlReport};
pub use rate_limit::{Policy, RateLimitError, RateLimiter};
pub use retry::{CredentialFailure, RemediationError, Remediator, RetryError, RetryOrchestrator};

use crate::config::ConfigError;
use crate::fetcher::{CredentialKind, FetcherError};

/// Crawl errors
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    /// Request failure
    #[error(transparent)]
    Fetcher(#[from] FetcherError),

    /// Setup failure
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CredentialFailure for CrawlError {
    fn credential_kind(&self) -> Option<CredentialKind> {
        match self {
            CrawlError::Fetcher(err) => err.credential_kind(),
            CrawlError::Config(_) => None,
        }
    }
}

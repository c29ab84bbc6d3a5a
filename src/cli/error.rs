//! CLI error types and conversions

use crate::crawler::{CrawlError, RemediationError, RetryError};
use crate::credentials::CredentialsError;
use crate::fetcher::CredentialKind;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Credential loading or validation failed
    #[error("credentials error: {0}")]
    Credentials(#[from] CredentialsError),

    /// A credential is missing and cannot be asked for
    #[error("{} ({}) is required but not set", .0.display_name(), .0.env_var())]
    MissingCredential(CredentialKind),

    /// Prompting for a credential failed
    #[error("credential prompt failed: {0}")]
    Prompt(#[from] RemediationError),

    /// Crawler could not be set up
    #[error("setup error: {0}")]
    Setup(#[from] CrawlError),

    /// Crawl failed after retries
    #[error("crawl failed: {0}")]
    Crawl(#[from] RetryError<CrawlError>),

    /// Metrics exporter could not be installed
    #[error("metrics error: {0}")]
    Metrics(String),
}

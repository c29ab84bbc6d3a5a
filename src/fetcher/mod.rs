//! HTTP fetchers for the stash history API and the backend

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::Response;
use tracing::warn;

use crate::crawler::config::RATE_LIMIT_COOLDOWN;

pub mod classifier;
pub mod history_http;
pub mod pagination;
pub mod timestamps;

pub use classifier::{classify, CredentialError, CredentialKind, Endpoint};
pub use history_http::{FetchedPage, StashHistoryClient};
pub use pagination::{HistoryFetcher, SweepStep, SweepSummary};
pub use timestamps::TimestampClient;

/// Fetcher errors
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// Request rejected because of a bad credential
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// HTTP 429
    #[error("rate limit exceeded (HTTP 429), wait {retry_after:?} before trying again")]
    RateLimited {
        /// Suggested cooldown
        retry_after: Duration,
    },

    /// Other non-2xx response
    #[error("HTTP error {status}: {message}")]
    HttpError {
        /// Status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Network error
    #[error("network error: {0}")]
    NetworkError(String),

    /// Response parse error
    #[error("parse error: {0}")]
    ParseError(String),

    /// Response parsed but inconsistent
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl FetcherError {
    /// Credential kind when this is a credential error
    pub fn credential_kind(&self) -> Option<CredentialKind> {
        match self {
            FetcherError::Credential(err) => Some(err.kind),
            _ => None,
        }
    }

    /// Suggested cooldown when the server asked us to slow down
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetcherError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Cooldown requested by a 429 response, falling back to a fixed cooldown
fn retry_after(response: &Response) -> Duration {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(RATE_LIMIT_COOLDOWN)
}

/// Turn a non-2xx response into the matching error
pub(crate) async fn error_for_response(endpoint: Endpoint, response: Response) -> FetcherError {
    let status = response.status();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after(&response);
        warn!(
            endpoint = endpoint.as_str(),
            retry_after_secs = retry_after.as_secs(),
            "Too many requests"
        );
        return FetcherError::RateLimited { retry_after };
    }

    if let Some(kind) = classify(endpoint, status) {
        crate::metrics::record_credential_error(kind);
        warn!(
            endpoint = endpoint.as_str(),
            status = status.as_u16(),
            credential = kind.as_str(),
            "Request rejected, credential most likely invalid"
        );
        return CredentialError::from_status(kind, status).into();
    }

    let message = response
        .text()
        .await
        .ok()
        .filter(|body| !body.trim().is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
    FetcherError::HttpError {
        status: status.as_u16(),
        message,
    }
}

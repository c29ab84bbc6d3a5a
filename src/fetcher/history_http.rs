//! Client for the paginated guild stash history endpoint
//!
//! Every request:
//! - waits on the shared [`RateLimiter`]
//! - authenticates with the `POESESSID` session cookie
//! - feeds the rate limit headers of successful responses back to the limiter

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::COOKIE;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::CrawlerConfig;
use crate::crawler::rate_limit::RateLimiter;
use crate::credentials::CredentialStore;
use crate::fetcher::{error_for_response, Endpoint, FetcherError, FetcherResult};
use crate::metrics::HttpRequestMetrics;
use crate::{Cursor, FetchRange, HistoryPage};

/// A parsed page together with the raw body it was parsed from
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Parsed page
    pub page: HistoryPage,
    /// Raw response body, forwarded to the backend as-is
    pub body: Bytes,
}

/// Query parameters for one page request
///
/// The API walks backwards: `from` is the newer bound and `end` the older one.
pub fn history_query(range: &FetchRange, cursor: Option<&Cursor>) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("from", range.end.to_string()),
        ("end", range.start.to_string()),
    ];
    if let Some(cursor) = cursor {
        params.push(("fromid", cursor.entry_id.clone()));
    }
    params
}

/// Stash history client
#[derive(Debug, Clone)]
pub struct StashHistoryClient {
    client: Client,
    config: Arc<CrawlerConfig>,
    credentials: CredentialStore,
    rate_limiter: Arc<RateLimiter>,
}

impl StashHistoryClient {
    /// Create a client sharing `rate_limiter` with every other user of the endpoint
    pub fn new(
        client: Client,
        config: Arc<CrawlerConfig>,
        credentials: CredentialStore,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client,
            config,
            credentials,
            rate_limiter,
        }
    }

    /// Rate limiter guarding this endpoint
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Fetch one page of `range`, continuing after `cursor` when given
    pub async fn fetch_page(
        &self,
        range: &FetchRange,
        cursor: Option<&Cursor>,
    ) -> FetcherResult<FetchedPage> {
        let credentials = self.credentials.snapshot();
        let url = self.config.history_url(credentials.guild_id());
        let params = history_query(range, cursor);

        self.rate_limiter.wait().await;

        debug!(
            guild_id = %credentials.guild_id(),
            start = range.start,
            end = range.end,
            cursor = cursor.map(|c| c.entry_id.as_str()).unwrap_or(""),
            "Requesting stash history page"
        );

        let request_metrics = HttpRequestMetrics::start(Endpoint::StashHistory);
        let response = self
            .client
            .get(&url)
            .query(&params)
            .header(COOKIE, format!("POESESSID={}", credentials.session_id()))
            .send()
            .await
            .map_err(|e| {
                request_metrics.record_network_error();
                FetcherError::NetworkError(e.to_string())
            })?;

        let status = response.status();
        request_metrics.record_complete(status.as_u16());
        if !status.is_success() {
            return Err(error_for_response(Endpoint::StashHistory, response).await);
        }

        if let Err(e) = self.rate_limiter.update_from_headers(response.headers()) {
            warn!(error = %e, "Could not update rate limit policies from response headers");
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetcherError::NetworkError(format!("Failed to read response body: {e}")))?;
        let page: HistoryPage = serde_json::from_slice(&body)
            .map_err(|e| FetcherError::ParseError(format!("Failed to parse history page: {e}")))?;

        crate::metrics::record_page(page.entries.len(), page.truncated);
        debug!(
            entries = page.entries.len(),
            truncated = page.truncated,
            limiter = %self.rate_limiter.state_summary(),
            "Received stash history page"
        );

        Ok(FetchedPage { page, body })
    }
}

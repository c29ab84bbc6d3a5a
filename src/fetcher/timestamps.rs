//! Backend lookup of the stored span for a guild

use std::sync::Arc;

use reqwest::Client;
use tracing::{debug, info};

use crate::config::CrawlerConfig;
use crate::credentials::CredentialStore;
use crate::fetcher::{error_for_response, Endpoint, FetcherError, FetcherResult};
use crate::metrics::HttpRequestMetrics;
use crate::LeagueTimestamps;

/// Client for the backend `latest_timestamp` endpoint
#[derive(Debug, Clone)]
pub struct TimestampClient {
    client: Client,
    config: Arc<CrawlerConfig>,
    credentials: CredentialStore,
}

impl TimestampClient {
    /// Create a client
    pub fn new(client: Client, config: Arc<CrawlerConfig>, credentials: CredentialStore) -> Self {
        Self {
            client,
            config,
            credentials,
        }
    }

    /// Fetch stored earliest/latest timestamps and the league bounds
    pub async fn fetch(&self) -> FetcherResult<LeagueTimestamps> {
        let credentials = self.credentials.snapshot();
        let url = self.config.latest_timestamp_url(credentials.guild_id());
        debug!(url = %url, "Fetching stored timestamps");

        let request_metrics = HttpRequestMetrics::start(Endpoint::LatestTimestamp);
        let response = self
            .client
            .get(&url)
            .bearer_auth(credentials.backend_token())
            .send()
            .await
            .map_err(|e| {
                request_metrics.record_network_error();
                FetcherError::NetworkError(e.to_string())
            })?;

        let status = response.status();
        request_metrics.record_complete(status.as_u16());
        if !status.is_success() {
            return Err(error_for_response(Endpoint::LatestTimestamp, response).await);
        }

        let timestamps: LeagueTimestamps = response
            .json()
            .await
            .map_err(|e| FetcherError::ParseError(format!("Failed to parse timestamps: {e}")))?;
        timestamps.validate().map_err(FetcherError::InvalidResponse)?;

        info!(
            guild_id = %credentials.guild_id(),
            earliest = ?timestamps.earliest,
            latest = ?timestamps.latest,
            league_start = timestamps.league_start,
            league_end = timestamps.league_end,
            "Stored timestamps loaded"
        );
        Ok(timestamps)
    }
}

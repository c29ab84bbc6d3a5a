//! Runtime configuration
//!
//! A [`CrawlerConfig`] is built once by the caller and handed to every
//! component that talks to the network.

use std::time::Duration;

use reqwest::Client;

use crate::crawler::config::{DEFAULT_WATCH_INTERVAL, MAX_CREDENTIAL_ATTEMPTS};
use crate::credentials::GuildId;

/// Default base URL of the stash history API
pub const DEFAULT_POE_BASE_URL: &str = "https://www.pathofexile.com";

/// Default base URL of the backend
pub const DEFAULT_BACKEND_BASE_URL: &str = "https://v2202503259898322516.goodsrv.de/api";

/// Default credentials file
pub const DEFAULT_CONFIG_FILE: &str = "bpl-config.txt";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Explicit configuration for the crawler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlerConfig {
    /// Base URL of the stash history API, without trailing slash
    pub poe_base_url: String,
    /// Base URL of the backend, without trailing slash
    pub backend_base_url: String,
    /// User agent sent with every request
    pub user_agent: String,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout
    pub request_timeout: Duration,
    /// Interval between continuous-mode cycles
    pub watch_interval: Duration,
    /// Attempts before credential errors become terminal
    pub max_credential_attempts: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            poe_base_url: DEFAULT_POE_BASE_URL.to_string(),
            backend_base_url: DEFAULT_BACKEND_BASE_URL.to_string(),
            user_agent: format!(
                "{}/{} (guild stash sync)",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            watch_interval: DEFAULT_WATCH_INTERVAL,
            max_credential_attempts: MAX_CREDENTIAL_ATTEMPTS,
        }
    }
}

impl CrawlerConfig {
    /// Override the history API base URL
    pub fn with_poe_base_url(mut self, url: impl Into<String>) -> Self {
        self.poe_base_url = trim_base(url.into());
        self
    }

    /// Override the backend base URL
    pub fn with_backend_base_url(mut self, url: impl Into<String>) -> Self {
        self.backend_base_url = trim_base(url.into());
        self
    }

    /// Override the continuous-mode interval
    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval;
        self
    }

    /// Build the HTTP client shared by all components
    pub fn build_http_client(&self) -> Result<Client, ConfigError> {
        Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))
    }

    /// Paginated stash history endpoint
    pub fn history_url(&self, guild_id: &GuildId) -> String {
        format!("{}/api/guild/{}/stash/history", self.poe_base_url, guild_id)
    }

    /// Backend page upload endpoint
    pub fn upload_url(&self, guild_id: &GuildId) -> String {
        format!(
            "{}/current/guilds/{}/stash-history",
            self.backend_base_url, guild_id
        )
    }

    /// Backend stored-timestamp lookup endpoint
    pub fn latest_timestamp_url(&self, guild_id: &GuildId) -> String {
        format!("{}/latest_timestamp", self.upload_url(guild_id))
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

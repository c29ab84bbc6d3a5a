//! # Guild Stash Sync Library
//!
//! Crawls a guild's stash change log backwards in time from a rate-limited
//! third-party API and forwards every truncated page to a backend for storage.
//!
//! ## Features
//!
//! - **Adaptive Rate Limiting**: Multiple concurrent window quotas reconciled from
//!   `X-Rate-Limit-Account` / `X-Rate-Limit-Account-State` response headers
//! - **Backward Pagination**: Sweeps a bounded `[start, end]` window from the newest
//!   entry towards the oldest, resuming from the oldest entry's cursor
//! - **Credential Classification**: HTTP failures mapped to a closed set of
//!   credential kinds so the caller can ask for fresh values and retry
//! - **Asynchronous Delivery**: Pages are queued to a background sink that can be
//!   flushed and drained at shutdown
//!
//! ## Quick Start
//!
//! ```no_run
//! use guild_stash_sync::crawler::CrawlDriver;
//! use guild_stash_sync::{CrawlerConfig, CredentialStore, Credentials};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::new("poesessid", "backend-token", "408208")?;
//! let driver = CrawlDriver::new(CrawlerConfig::default(), CredentialStore::new(credentials))?;
//!
//! let report = driver.run_once().await?;
//! let delivered = driver.finish().await;
//! println!("{} pages fetched, {} delivered", report.pages, delivered.delivered);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`crawler`] - Rate limiter, retry orchestration, progress and the top-level driver
//! - [`fetcher`] - HTTP clients, response classification and the backward sweep
//! - [`sink`] - Background delivery of fetched pages to the backend
//! - [`credentials`] - Credential values, validation and persistence
//! - [`config`] - Explicit runtime configuration passed to every constructor

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};

/// CLI command implementations
pub mod cli;

/// Runtime configuration
pub mod config;

/// Crawl orchestration, rate limiting and retry
pub mod crawler;

/// Credential values and persistence
pub mod credentials;

/// HTTP fetchers and response classification
pub mod fetcher;

/// Observability metrics
pub mod metrics;

/// Graceful shutdown coordination
pub mod shutdown;

/// Page delivery to the backend
pub mod sink;

pub use config::CrawlerConfig;
pub use credentials::{CredentialStore, Credentials, GuildId};

/// Seconds added to the league end so late entries are still captured
pub const LEAGUE_END_GRACE_SECS: i64 = 24 * 60 * 60;

/// Account that performed a stash action
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    /// Account name
    #[serde(default)]
    pub name: String,
}

/// Single stash change entry
///
/// Only `id` and `timestamp` drive pagination; everything else is carried
/// through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    /// Entry identifier, used as the pagination cursor
    pub id: String,
    /// Unix timestamp in seconds
    #[serde(rename = "time")]
    pub timestamp: i64,
    /// League name
    #[serde(default)]
    pub league: String,
    /// Stash tab name
    #[serde(default)]
    pub stash: Option<String>,
    /// Item payload as sent by the API
    #[serde(default, rename = "item")]
    pub item_payload: serde_json::Value,
    /// Action performed (added, removed, modified)
    #[serde(default)]
    pub action: String,
    /// Account that performed the action
    #[serde(default)]
    pub account: Account,
    /// Horizontal stash position
    #[serde(default)]
    pub x: Option<i64>,
    /// Vertical stash position
    #[serde(default)]
    pub y: Option<i64>,
}

impl HistoryEntry {
    /// Account name of the entry
    pub fn account_name(&self) -> &str {
        &self.account.name
    }
}

/// One page of the stash change log, newest entry first
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HistoryPage {
    /// Entries ordered newest-first
    #[serde(default)]
    pub entries: Vec<HistoryEntry>,
    /// Whether the server cut the page short and more entries remain
    #[serde(default)]
    pub truncated: bool,
}

impl HistoryPage {
    /// Newest entry of the page
    pub fn newest(&self) -> Option<&HistoryEntry> {
        self.entries.first()
    }

    /// Oldest entry of the page
    pub fn oldest(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// A page ends the sweep when it is empty or not truncated
    pub fn is_terminal(&self) -> bool {
        self.entries.is_empty() || !self.truncated
    }

    /// Cursor to continue from, derived from the oldest entry of a truncated page
    pub fn next_cursor(&self) -> Option<Cursor> {
        if self.is_terminal() {
            return None;
        }
        self.oldest().map(Cursor::from)
    }

    /// Validate newest-first ordering
    pub fn validate(&self) -> Result<(), String> {
        for pair in self.entries.windows(2) {
            if pair[1].timestamp > pair[0].timestamp {
                return Err(format!(
                    "Entries out of order: {} ({}) precedes {} ({})",
                    pair[0].id, pair[0].timestamp, pair[1].id, pair[1].timestamp
                ));
            }
        }
        Ok(())
    }
}

/// Position to resume pagination from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor {
    /// Timestamp of the oldest entry seen so far
    pub timestamp: i64,
    /// Identifier of that entry
    pub entry_id: String,
}

impl From<&HistoryEntry> for Cursor {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            timestamp: entry.timestamp,
            entry_id: entry.id.clone(),
        }
    }
}

/// Time range covered by one backward sweep (Unix seconds)
///
/// Crawling walks from `end` (newer) towards `start` (older).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRange {
    /// Older boundary, fixed for the whole sweep
    pub start: i64,
    /// Newer boundary, narrowed after every truncated page
    pub end: i64,
}

impl FetchRange {
    /// Create a range
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Range for the next page: same `start`, `end` moved to the cursor
    pub fn narrowed_to(&self, cursor: &Cursor) -> Self {
        Self {
            start: self.start,
            end: cursor.timestamp,
        }
    }
}

/// Timestamps reported by the backend for a guild
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeagueTimestamps {
    /// Oldest entry already stored, if any
    pub earliest: Option<i64>,
    /// Newest entry already stored, if any
    pub latest: Option<i64>,
    /// League start (Unix seconds)
    pub league_start: i64,
    /// League end (Unix seconds)
    pub league_end: i64,
}

impl LeagueTimestamps {
    /// Upper bound used for sweeps that run up to the present
    pub fn day_after_league_end(&self) -> i64 {
        self.league_end.saturating_add(LEAGUE_END_GRACE_SECS)
    }

    /// Known stored span, present only when both ends are known
    pub fn stored_span(&self) -> Option<(i64, i64)> {
        self.earliest.zip(self.latest)
    }

    /// Sweeps needed to close the gaps around the stored span
    ///
    /// Without stored state a single sweep covers the whole league. Otherwise
    /// one sweep fills `[league_start, earliest]` and a second one
    /// `[latest, league_end + 1 day]`.
    pub fn sweep_plan(&self) -> Vec<FetchRange> {
        match self.stored_span() {
            None => vec![FetchRange::new(
                self.league_start,
                self.day_after_league_end(),
            )],
            Some((earliest, latest)) => vec![
                FetchRange::new(self.league_start, earliest),
                FetchRange::new(latest, self.day_after_league_end()),
            ],
        }
    }

    /// Validate league bounds
    pub fn validate(&self) -> Result<(), String> {
        if self.league_end <= self.league_start {
            return Err(format!(
                "League end ({}) must be after league start ({})",
                self.league_end, self.league_start
            ));
        }
        Ok(())
    }
}

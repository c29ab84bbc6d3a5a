//! Top-level crawl driver
//!
//! A single run asks the backend which span it already stores and sweeps the
//! gaps on both sides of it. Continuous mode then keeps sweeping from the last
//! successful cycle up to the day after the league end, once per interval.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use super::progress::{format_duration, format_timestamp, SweepProgress};
use super::rate_limit::RateLimiter;
use super::retry::CredentialFailure;
use super::CrawlError;
use crate::config::CrawlerConfig;
use crate::credentials::CredentialStore;
use crate::fetcher::{HistoryFetcher, StashHistoryClient, SweepSummary, TimestampClient};
use crate::shutdown::{SharedShutdown, ShutdownCoordinator};
use crate::sink::{BackendSink, PageSink, SinkStats};
use crate::{FetchRange, LeagueTimestamps};

/// Totals of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    /// Sweeps completed
    pub sweeps: usize,
    /// Pages fetched
    pub pages: usize,
    /// Entries seen
    pub entries: usize,
    /// Pages handed to the sink
    pub dispatched: usize,
    /// Continuous-mode cycles completed
    pub cycles: usize,
}

impl CrawlReport {
    fn absorb(&mut self, summary: SweepSummary) {
        self.sweeps += 1;
        self.pages += summary.pages;
        self.entries += summary.entries;
        self.dispatched += summary.dispatched;
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Crawl driver owning the rate limiter and the sink for the whole process
///
/// Both survive retries, so limiter state and queued pages carry over between
/// attempts.
pub struct CrawlDriver {
    config: Arc<CrawlerConfig>,
    timestamps: TimestampClient,
    history: StashHistoryClient,
    sink: Arc<BackendSink>,
    shutdown: SharedShutdown,
    show_progress: bool,
}

impl CrawlDriver {
    /// Build the driver and start the sink worker
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: CrawlerConfig, credentials: CredentialStore) -> Result<Self, CrawlError> {
        let config = Arc::new(config);
        let client = config.build_http_client()?;
        let rate_limiter = Arc::new(RateLimiter::new());

        let sink = Arc::new(BackendSink::spawn(
            client.clone(),
            config.clone(),
            credentials.clone(),
        ));
        let timestamps = TimestampClient::new(client.clone(), config.clone(), credentials.clone());
        let history = StashHistoryClient::new(client, config.clone(), credentials, rate_limiter);

        Ok(Self {
            config,
            timestamps,
            history,
            sink,
            shutdown: ShutdownCoordinator::shared(),
            show_progress: false,
        })
    }

    /// Stop sweeping when `shutdown` is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Draw a progress bar on the terminal
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Rate limiter shared by every sweep
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        self.history.rate_limiter()
    }

    /// Sink receiving truncated pages
    pub fn sink(&self) -> &Arc<BackendSink> {
        &self.sink
    }

    fn fetcher(&self, timestamps: &LeagueTimestamps) -> HistoryFetcher {
        let progress = if self.show_progress {
            SweepProgress::new(timestamps)
        } else {
            SweepProgress::hidden(timestamps)
        };
        let sink: Arc<dyn PageSink> = self.sink.clone();
        HistoryFetcher::new(self.history.clone(), sink).with_progress(progress)
    }

    /// Sweep `range`, returning `None` if shutdown interrupted it
    async fn sweep(
        &self,
        fetcher: &HistoryFetcher,
        range: FetchRange,
    ) -> Result<Option<SweepSummary>, CrawlError> {
        if self.shutdown.is_shutdown_requested() {
            return Ok(None);
        }
        tokio::select! {
            result = fetcher.sweep(range) => Ok(Some(result?)),
            _ = self.shutdown.wait_for_shutdown() => {
                warn!(start = range.start, end = range.end, "Shutdown requested, sweep interrupted");
                Ok(None)
            }
        }
    }

    /// Close the gaps around the stored span once
    pub async fn run_once(&self) -> Result<CrawlReport, CrawlError> {
        let timestamps = self.timestamps.fetch().await?;
        let fetcher = self.fetcher(&timestamps);
        let mut report = CrawlReport::default();

        for range in timestamps.sweep_plan() {
            match self.sweep(&fetcher, range).await? {
                Some(summary) => report.absorb(summary),
                None => break,
            }
        }

        if let Some(progress) = fetcher.progress() {
            progress.finish(format!("{} pages, {} entries", report.pages, report.entries));
        }
        Ok(report)
    }

    /// Backfill once, then sweep new entries every interval until shutdown
    ///
    /// A cycle's lower bound only advances when the cycle succeeds, to the
    /// instant captured before it started. Failed cycles are retried over the
    /// same range; credential errors end the run.
    pub async fn run_continuous(&self) -> Result<CrawlReport, CrawlError> {
        let timestamps = self.timestamps.fetch().await?;
        let fetcher = self.fetcher(&timestamps);
        let upper = timestamps.day_after_league_end();
        let interval = self.config.watch_interval;
        let mut report = CrawlReport::default();

        let mut latest = match timestamps.stored_span() {
            None => {
                let started = unix_now();
                match self
                    .sweep(&fetcher, FetchRange::new(timestamps.league_start, upper))
                    .await?
                {
                    Some(summary) => report.absorb(summary),
                    None => return Ok(report),
                }
                started.min(upper)
            }
            Some((earliest, latest)) => {
                match self
                    .sweep(&fetcher, FetchRange::new(timestamps.league_start, earliest))
                    .await?
                {
                    Some(summary) => report.absorb(summary),
                    None => return Ok(report),
                }
                latest
            }
        };

        info!(
            interval = %format_duration(interval),
            from = %format_timestamp(latest),
            "Watching for new stash history"
        );

        loop {
            let cycle_start = unix_now();
            let mut delay = interval;

            match self.sweep(&fetcher, FetchRange::new(latest, upper)).await {
                Ok(Some(summary)) => {
                    report.absorb(summary);
                    report.cycles += 1;
                    latest = cycle_start.min(upper);
                    crate::metrics::record_watch_cycle("success");
                    info!(
                        pages = summary.pages,
                        entries = summary.entries,
                        next_from = %format_timestamp(latest),
                        "Watch cycle complete"
                    );
                }
                Ok(None) => break,
                Err(err) if err.credential_kind().is_some() => {
                    crate::metrics::record_watch_cycle("credential_error");
                    return Err(err);
                }
                Err(err) => {
                    crate::metrics::record_watch_cycle("failed");
                    let retry_after = match &err {
                        CrawlError::Fetcher(fetch_err) => fetch_err.retry_after(),
                        CrawlError::Config(_) => None,
                    };
                    delay = failure_delay(interval, retry_after);
                    warn!(
                        error = %err,
                        retry_in = %format_duration(delay),
                        from = %format_timestamp(latest),
                        "Watch cycle failed, the same range will be retried"
                    );
                }
            }

            if !self.shutdown.sleep_or_shutdown(delay).await {
                break;
            }
        }

        info!(cycles = report.cycles, "Stopped watching");
        Ok(report)
    }

    /// Wait for queued pages to be delivered and stop the sink
    pub async fn finish(&self) -> SinkStats {
        let stats = self.sink.shutdown().await;
        info!(
            delivered = stats.delivered,
            failed = stats.failed,
            "Backend delivery finished"
        );
        stats
    }
}

/// Delay after a failed cycle: the interval, or the server's cooldown if longer
fn failure_delay(interval: Duration, retry_after: Option<Duration>) -> Duration {
    retry_after.map_or(interval, |cooldown| interval.max(cooldown))
}

//! Backward pagination over a time range
//!
//! A sweep starts at the newer bound of a [`FetchRange`] and walks towards the
//! older one. Each truncated page is handed to the sink and the range is
//! narrowed to the page's oldest entry, which also becomes the cursor. The
//! sweep ends on the first page that is empty or not truncated. A page whose
//! newest entry lies after the current range end is rejected.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::crawler::config::MAX_SWEEP_PAGES;
use crate::crawler::progress::SweepProgress;
use crate::fetcher::{FetcherError, FetcherResult, StashHistoryClient};
use crate::sink::PageSink;
use crate::{Cursor, FetchRange};

/// Outcome of one pagination step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepStep {
    /// More pages remain: fetch `range` after `cursor` next
    Continue {
        /// Narrowed range
        range: FetchRange,
        /// Oldest entry of the page just handled
        cursor: Cursor,
        /// Entries on the page just handled
        entries: usize,
    },
    /// The sweep is complete
    Done {
        /// Entries on the final page
        entries: usize,
    },
}

/// Totals for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Pages fetched
    pub pages: usize,
    /// Entries seen across all pages
    pub entries: usize,
    /// Pages handed to the sink
    pub dispatched: usize,
}

/// Sweeps history ranges and dispatches truncated pages
#[derive(Clone)]
pub struct HistoryFetcher {
    client: StashHistoryClient,
    sink: Arc<dyn PageSink>,
    progress: Option<SweepProgress>,
}

impl HistoryFetcher {
    /// Create a fetcher dispatching to `sink`
    pub fn new(client: StashHistoryClient, sink: Arc<dyn PageSink>) -> Self {
        Self {
            client,
            sink,
            progress: None,
        }
    }

    /// Report progress while sweeping
    pub fn with_progress(mut self, progress: SweepProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Progress tracker, if any
    pub fn progress(&self) -> Option<&SweepProgress> {
        self.progress.as_ref()
    }

    /// Fetch one page and decide how the sweep continues
    pub async fn step(&self, range: &FetchRange, cursor: Option<&Cursor>) -> FetcherResult<SweepStep> {
        let fetched = self.client.fetch_page(range, cursor).await?;
        let page = fetched.page;
        let entries = page.entries.len();

        if let Err(reason) = page.validate() {
            warn!(reason = %reason, "History page is not ordered newest-first");
        }

        // Newest timestamps never increase from one page to the next
        if let Some(newest) = page.newest() {
            if newest.timestamp > range.end {
                return Err(FetcherError::InvalidResponse(format!(
                    "page starts at {} after range end {}",
                    newest.timestamp, range.end
                )));
            }
        }

        if let (Some(progress), Some(newest)) = (&self.progress, page.newest()) {
            progress.update(newest.timestamp, &self.client.rate_limiter().state_summary());
        }

        let Some(next_cursor) = page.next_cursor() else {
            debug!(entries, truncated = page.truncated, "Sweep reached its final page");
            return Ok(SweepStep::Done { entries });
        };

        self.sink.dispatch(fetched.body);

        Ok(SweepStep::Continue {
            range: range.narrowed_to(&next_cursor),
            cursor: next_cursor,
            entries,
        })
    }

    /// Walk `range` backwards until a final page is reached
    pub async fn sweep(&self, range: FetchRange) -> FetcherResult<SweepSummary> {
        info!(start = range.start, end = range.end, "Starting sweep");

        let mut summary = SweepSummary::default();
        let mut current = range;
        let mut cursor: Option<Cursor> = None;

        loop {
            if summary.pages >= MAX_SWEEP_PAGES {
                return Err(FetcherError::InvalidResponse(format!(
                    "sweep exceeded {MAX_SWEEP_PAGES} pages"
                )));
            }

            let step = self.step(&current, cursor.as_ref()).await?;
            summary.pages += 1;

            match step {
                SweepStep::Done { entries } => {
                    summary.entries += entries;
                    break;
                }
                SweepStep::Continue {
                    range: next_range,
                    cursor: next_cursor,
                    entries,
                } => {
                    summary.entries += entries;
                    summary.dispatched += 1;

                    if next_range.end > current.end {
                        return Err(FetcherError::InvalidResponse(format!(
                            "page moved forward in time: {} after {}",
                            next_range.end, current.end
                        )));
                    }
                    if cursor.as_ref() == Some(&next_cursor) {
                        return Err(FetcherError::InvalidResponse(format!(
                            "pagination stalled at entry {}",
                            next_cursor.entry_id
                        )));
                    }

                    debug!(
                        end = next_range.end,
                        cursor = %next_cursor.entry_id,
                        pages = summary.pages,
                        "Continuing sweep"
                    );
                    current = next_range;
                    cursor = Some(next_cursor);
                }
            }
        }

        info!(
            start = range.start,
            end = range.end,
            pages = summary.pages,
            entries = summary.entries,
            dispatched = summary.dispatched,
            "Sweep complete"
        );
        Ok(summary)
    }
}

//! Progress display for sweeps
//!
//! Progress is estimated from where the newest entry of the last page sits on
//! the league timeline. The crawl walks backwards, so the percentage grows as
//! entries get closer to the league start.

use std::time::Duration;

use chrono::DateTime;
use indicatif::{ProgressBar, ProgressStyle};

use crate::LeagueTimestamps;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}";

/// Share of the league timeline already crawled, in percent (0-100)
pub fn progress_percentage(league_start: i64, league_end: i64, current: i64) -> u64 {
    // i128 holds any difference of two i64 timestamps
    let total = i128::from(league_end) - i128::from(league_start);
    if total <= 0 {
        return 100;
    }
    let remaining = i128::from(current) - i128::from(league_start);
    let percentage = 100 * (total - remaining) / total;
    percentage.clamp(0, 100) as u64
}

/// Render a Unix timestamp as `YYYY-MM-DD HH:MM` UTC
pub fn format_timestamp(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Render a duration as `45s`, `12m` or `1.5h`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}

/// Progress bar for the sweeps of one crawl
#[derive(Debug, Clone)]
pub struct SweepProgress {
    league_start: i64,
    league_end: i64,
    bar: ProgressBar,
}

impl SweepProgress {
    /// Visible progress bar for a league
    pub fn new(timestamps: &LeagueTimestamps) -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self::with_bar(timestamps, bar)
    }

    /// Progress tracking without terminal output
    pub fn hidden(timestamps: &LeagueTimestamps) -> Self {
        Self::with_bar(timestamps, ProgressBar::hidden())
    }

    fn with_bar(timestamps: &LeagueTimestamps, bar: ProgressBar) -> Self {
        Self {
            league_start: timestamps.league_start,
            league_end: timestamps.league_end,
            bar,
        }
    }

    /// Update from the newest entry of a page and the limiter state
    pub fn update(&self, newest_timestamp: i64, limiter_state: &str) {
        self.bar.set_position(self.percentage(newest_timestamp));
        self.bar.set_message(format!(
            "at {} | rate limits {}",
            format_timestamp(newest_timestamp),
            limiter_state
        ));
    }

    /// Percentage for a timestamp on this league's timeline
    pub fn percentage(&self, timestamp: i64) -> u64 {
        progress_percentage(self.league_start, self.league_end, timestamp)
    }

    /// Current bar position
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Stop the bar, leaving a final message
    pub fn finish(&self, message: impl Into<String>) {
        self.bar.finish_with_message(message.into());
    }
}

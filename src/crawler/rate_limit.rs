//! Sliding-log rate limiter driven by server-reported quotas
//!
//! The history API reports every active quota in two paired headers:
//!
//! - `X-Rate-Limit-Account`: `max:window_secs:restriction_secs` triplets
//! - `X-Rate-Limit-Account-State`: `used:window_secs:secs_until_reset` triplets
//!
//! [`RateLimiter`] keeps a log of request timestamps and, before each request,
//! sleeps exactly until no policy would be exceeded. After each successful
//! response the policy set is replaced with the reported one and the local log
//! is topped up with synthetic hits until every window holds the server's
//! reported usage (capped at the policy maximum).

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::header::HeaderMap;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use super::config::{retention_for, FALLBACK_POLICIES};

/// Header carrying the quota definitions
pub const LIMIT_HEADER: &str = "x-rate-limit-account";

/// Header carrying the current usage of each quota
pub const STATE_HEADER: &str = "x-rate-limit-account-state";

/// Rate limiter errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// A required header is absent or empty
    #[error("missing rate limit header: {0}")]
    MissingHeader(&'static str),

    /// Limit and state headers describe a different number of policies
    #[error("rate limit headers disagree: {limits} limit rules vs {states} state rules")]
    LengthMismatch {
        /// Number of triplets in the limit header
        limits: usize,
        /// Number of triplets in the state header
        states: usize,
    },

    /// Every triplet was malformed
    #[error("no valid rate limit policy in headers")]
    NoValidPolicies,
}

/// A single quota: at most `max_hits` requests per trailing `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    max_hits: u32,
    window: Duration,
}

impl Policy {
    /// Create a policy
    pub fn new(max_hits: u32, window: Duration) -> Self {
        Self { max_hits, window }
    }

    /// Maximum hits inside the window
    pub fn max_hits(&self) -> u32 {
        self.max_hits
    }

    /// Window length
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Index of the first hit still inside the window (hits are sorted oldest-first)
    fn first_in_window(&self, hits: &VecDeque<Instant>, now: Instant) -> usize {
        hits.partition_point(|&hit| now.saturating_duration_since(hit) >= self.window)
    }

    fn current_hits(&self, hits: &VecDeque<Instant>, now: Instant) -> usize {
        hits.len() - self.first_in_window(hits, now)
    }

    /// Instant at which one more request stops violating this policy, if it currently does
    fn release_at(&self, hits: &VecDeque<Instant>, now: Instant) -> Option<Instant> {
        let first = self.first_in_window(hits, now);
        let in_window = hits.len() - first;
        if in_window < self.max_hits as usize {
            return None;
        }
        let excess = in_window - self.max_hits as usize;
        hits.get(first + excess).map(|&hit| hit + self.window)
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s", self.max_hits, self.window.as_secs())
    }
}

/// Policy parsed from one limit/state triplet pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportedPolicy {
    /// Quota definition
    pub policy: Policy,
    /// Hits the server has counted in the current window
    pub used: u32,
    /// Seconds until the server-side window resets
    pub seconds_until_reset: u64,
}

fn parse_triplet(raw: &str) -> Option<(u64, u64, u64)> {
    let mut parts = raw.trim().split(':').map(|part| part.trim().parse::<u64>());
    let triplet = (parts.next()?.ok()?, parts.next()?.ok()?, parts.next()?.ok()?);
    if parts.next().is_some() {
        return None;
    }
    Some(triplet)
}

/// Parse paired limit/state header values
///
/// The lists must have the same length. Individually malformed pairs
/// (non-numeric fields, zero max or zero window) are skipped.
pub fn parse_policy_headers(
    limit: &str,
    state: &str,
) -> Result<Vec<ReportedPolicy>, RateLimitError> {
    let limits: Vec<&str> = limit.split(',').collect();
    let states: Vec<&str> = state.split(',').collect();
    if limits.len() != states.len() {
        return Err(RateLimitError::LengthMismatch {
            limits: limits.len(),
            states: states.len(),
        });
    }

    let mut reported = Vec::with_capacity(limits.len());
    for (index, (limit_raw, state_raw)) in limits.iter().zip(&states).enumerate() {
        let (Some((max_hits, window_secs, _restriction)), Some((used, _, until_reset))) =
            (parse_triplet(limit_raw), parse_triplet(state_raw))
        else {
            debug!(index, limit = %limit_raw, state = %state_raw, "Skipping malformed rate limit triplet");
            continue;
        };
        let (Ok(max_hits), Ok(used)) = (u32::try_from(max_hits), u32::try_from(used)) else {
            debug!(index, "Skipping out-of-range rate limit triplet");
            continue;
        };
        if max_hits == 0 || window_secs == 0 {
            debug!(index, max_hits, window_secs, "Skipping degenerate rate limit triplet");
            continue;
        }
        reported.push(ReportedPolicy {
            policy: Policy::new(max_hits, Duration::from_secs(window_secs)),
            used,
            seconds_until_reset: until_reset,
        });
    }
    Ok(reported)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, RateLimitError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(RateLimitError::MissingHeader(name))
}

#[derive(Debug)]
struct LimiterState {
    policies: Vec<Policy>,
    /// Request timestamps, oldest first
    hits: VecDeque<Instant>,
}

impl LimiterState {
    /// Earliest instant at which every policy admits one more request
    fn release_at(&self, now: Instant) -> Option<Instant> {
        self.policies
            .iter()
            .filter_map(|policy| policy.release_at(&self.hits, now))
            .max()
    }

    /// Insert `count` hits stamped `stamp`, keeping the log sorted
    fn record_at(&mut self, stamp: Instant, count: usize) {
        let at = self.hits.partition_point(|&hit| hit <= stamp);
        for _ in 0..count {
            self.hits.insert(at, stamp);
        }
    }

    fn prune(&mut self, now: Instant) {
        let longest = self
            .policies
            .iter()
            .map(Policy::window)
            .max()
            .unwrap_or_default();
        let retention = retention_for(longest);
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) < retention {
                break;
            }
            self.hits.pop_front();
        }
    }
}

/// Rate limiter shared by every request to the history endpoint
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Create a limiter with the fallback policies
    pub fn new() -> Self {
        Self::with_policies(
            FALLBACK_POLICIES
                .iter()
                .map(|&(max_hits, window_secs)| {
                    Policy::new(max_hits, Duration::from_secs(window_secs))
                })
                .collect(),
        )
    }

    /// Create a limiter with explicit policies
    pub fn with_policies(policies: Vec<Policy>) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                policies,
                hits: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until one more request fits every policy, then record it
    ///
    /// Returns the time spent waiting.
    pub async fn wait(&self) -> Duration {
        let started = Instant::now();
        loop {
            let release_at = {
                let mut state = self.lock();
                let now = Instant::now();
                match state.release_at(now) {
                    None => {
                        state.hits.push_back(now);
                        state.prune(now);
                        let waited = now.saturating_duration_since(started);
                        crate::metrics::record_rate_limit_wait(waited);
                        return waited;
                    }
                    Some(at) => at,
                }
            };

            let remaining = release_at.saturating_duration_since(Instant::now());
            if remaining >= Duration::from_secs(1) {
                warn!(
                    remaining_secs = remaining.as_secs(),
                    state = %self.state_summary(),
                    "Rate limit reached, waiting for window to reset"
                );
            } else {
                debug!(remaining_ms = remaining.as_millis() as u64, "Rate limit wait");
            }
            sleep_until(release_at).await;
        }
    }

    /// Replace the policy set from response headers
    ///
    /// On error the previous policies and hits are left untouched. Returns the
    /// number of active policies on success.
    pub fn update_from_headers(&self, headers: &HeaderMap) -> Result<usize, RateLimitError> {
        let limit = header_value(headers, LIMIT_HEADER)?;
        let state = header_value(headers, STATE_HEADER)?;
        let reported = parse_policy_headers(limit, state)?;
        if reported.is_empty() {
            return Err(RateLimitError::NoValidPolicies);
        }

        let mut by_window: Vec<&ReportedPolicy> = reported.iter().collect();
        by_window.sort_by_key(|entry| entry.policy.window);

        let mut limiter = self.lock();
        let now = Instant::now();
        for (index, entry) in by_window.iter().enumerate() {
            let policy = entry.policy;
            let target = entry.used.min(policy.max_hits) as usize;
            let missing = target.saturating_sub(policy.current_hits(&limiter.hits, now));
            if missing == 0 {
                continue;
            }
            // Shorter windows already hold their reported usage: stamp the
            // extra hits just outside the longest of them.
            let offset = by_window[..index]
                .iter()
                .map(|shorter| shorter.policy.window)
                .filter(|&window| window < policy.window)
                .max()
                .unwrap_or_default();
            let stamp = now.checked_sub(offset).unwrap_or(now);
            limiter.record_at(stamp, missing);
        }
        limiter.policies = reported.iter().map(|entry| entry.policy).collect();
        limiter.prune(now);

        debug!(
            policies = limiter.policies.len(),
            limit = %limit,
            state = %state,
            "Rate limit policies updated"
        );
        crate::metrics::record_policy_update(limiter.policies.len());
        Ok(limiter.policies.len())
    }

    /// Current usage per policy as `hits:max:window_secs`, comma separated
    pub fn state_summary(&self) -> String {
        let limiter = self.lock();
        let now = Instant::now();
        limiter
            .policies
            .iter()
            .map(|policy| {
                format!(
                    "{}:{}:{}",
                    policy.current_hits(&limiter.hits, now),
                    policy.max_hits,
                    policy.window.as_secs()
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Active policies
    pub fn policies(&self) -> Vec<Policy> {
        self.lock().policies.clone()
    }

    /// Number of hits currently retained
    pub fn tracked_hits(&self) -> usize {
        self.lock().hits.len()
    }
}

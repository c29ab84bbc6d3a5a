//! Crawler constants

use std::time::Duration;

/// Policies used until the first response reports the real ones: `(max_hits, window_secs)`
pub const FALLBACK_POLICIES: [(u32, u64); 3] = [(60, 60), (120, 300), (300, 3600)];

/// Minimum age after which recorded hits are pruned
pub const HIT_RETENTION: Duration = Duration::from_secs(10 * 60);

/// Cooldown suggested for a 429 that carries no Retry-After header
pub const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// Total attempts of a crawl before giving up on credential errors
pub const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

/// Default interval between continuous-mode cycles
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Upper bound on pages fetched within a single sweep
pub const MAX_SWEEP_PAGES: usize = 100_000;

/// Retention horizon for a policy set: long enough to judge the widest window
pub fn retention_for(longest_window: Duration) -> Duration {
    longest_window.max(HIT_RETENTION)
}

//! Public rate limit header parsing and limiter behavior

use std::time::Duration;

use guild_stash_sync::crawler::rate_limit::{parse_policy_headers, LIMIT_HEADER, STATE_HEADER};
use guild_stash_sync::crawler::{Policy, RateLimitError, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue};
use tokio::time::Instant;

fn headers(limit: &'static str, state: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(LIMIT_HEADER, HeaderValue::from_static(limit));
    headers.insert(STATE_HEADER, HeaderValue::from_static(state));
    headers
}

#[test]
fn test_three_policy_header_with_whitespace() {
    let reported =
        parse_policy_headers(" 45:60:60, 240:240:900 ,600:3600:3600", "3:60:0,10:240:0, 20:3600:0")
            .unwrap();

    let policies: Vec<Policy> = reported.iter().map(|entry| entry.policy).collect();
    assert_eq!(
        policies,
        vec![
            Policy::new(45, Duration::from_secs(60)),
            Policy::new(240, Duration::from_secs(240)),
            Policy::new(600, Duration::from_secs(3600)),
        ]
    );
    assert_eq!(reported[2].used, 20);
}

#[test]
fn test_policy_display() {
    assert_eq!(Policy::new(45, Duration::from_secs(60)).to_string(), "45/60s");
}

#[test]
fn test_empty_header_is_missing() {
    let limiter = RateLimiter::new();
    assert_eq!(
        limiter.update_from_headers(&headers("", "1:60:0")),
        Err(RateLimitError::MissingHeader(LIMIT_HEADER))
    );
}

#[tokio::test(start_paused = true)]
async fn test_policy_set_shrinks_with_server_report() {
    let limiter = RateLimiter::new();
    limiter
        .update_from_headers(&headers("5:10:0,50:300:0", "0:10:0,0:300:0"))
        .unwrap();
    limiter.update_from_headers(&headers("5:10:0", "0:10:0")).unwrap();

    assert_eq!(limiter.policies(), vec![Policy::new(5, Duration::from_secs(10))]);
}

#[tokio::test(start_paused = true)]
async fn test_burst_then_throttle() {
    let limiter = RateLimiter::with_policies(vec![
        Policy::new(3, Duration::from_secs(5)),
        Policy::new(4, Duration::from_secs(60)),
    ]);
    let start = Instant::now();

    for _ in 0..3 {
        assert_eq!(limiter.wait().await, Duration::ZERO);
    }
    // fourth request waits for the short window
    limiter.wait().await;
    assert_eq!(start.elapsed(), Duration::from_secs(5));

    // fifth request waits for the long window
    limiter.wait().await;
    assert_eq!(start.elapsed(), Duration::from_secs(60));
    assert_eq!(limiter.state_summary(), "1:3:5, 2:4:60");
}

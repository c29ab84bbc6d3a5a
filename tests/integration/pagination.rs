//! Backward sweep behavior against a mock history API

use std::sync::Arc;
use std::time::Duration;

use guild_stash_sync::crawler::{Policy, RateLimiter};
use guild_stash_sync::fetcher::{FetcherError, HistoryFetcher, SweepStep, SweepSummary};
use guild_stash_sync::sink::PageSink;
use guild_stash_sync::{Cursor, FetchRange};
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer};

use crate::common::{history_client, history_response, page, RecordingSink, HISTORY_PATH};

fn fetcher(server: &MockServer, sink: Arc<RecordingSink>) -> HistoryFetcher {
    let client = history_client(server, Arc::new(RateLimiter::new()));
    let sink: Arc<dyn PageSink> = sink;
    HistoryFetcher::new(client, sink)
}

#[tokio::test]
async fn test_single_page_sweep_dispatches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("from", "5000"))
        .and(query_param("end", "1000"))
        .and(query_param_is_missing("fromid"))
        .and(header("cookie", "POESESSID=sess"))
        .respond_with(history_response(page(&[("b", 4000), ("a", 3000)], false)))
        .expect(1)
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let summary = fetcher(&server, sink.clone())
        .sweep(FetchRange::new(1000, 5000))
        .await
        .unwrap();

    assert_eq!(
        summary,
        SweepSummary {
            pages: 1,
            entries: 2,
            dispatched: 0,
        }
    );
    assert!(sink.pages().is_empty());
}

#[tokio::test]
async fn test_truncated_page_continues_from_oldest_entry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("from", "5000"))
        .and(query_param("end", "1000"))
        .and(query_param_is_missing("fromid"))
        .respond_with(history_response(page(&[("z", 4500), ("x", 3000)], true)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("from", "3000"))
        .and(query_param("end", "1000"))
        .and(query_param("fromid", "x"))
        .respond_with(history_response(page(&[("w", 2000)], false)))
        .expect(1)
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let summary = fetcher(&server, sink.clone())
        .sweep(FetchRange::new(1000, 5000))
        .await
        .unwrap();

    assert_eq!(summary.pages, 2);
    assert_eq!(summary.entries, 3);
    assert_eq!(summary.dispatched, 1);

    let pages = sink.pages();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0]["truncated"], true);
    assert_eq!(pages[0]["entries"][1]["id"], "x");
}

#[tokio::test]
async fn test_empty_truncated_page_ends_sweep() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(history_response(page(&[], true)))
        .expect(1)
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let summary = fetcher(&server, sink.clone())
        .sweep(FetchRange::new(1000, 5000))
        .await
        .unwrap();

    assert_eq!(summary.pages, 1);
    assert_eq!(summary.entries, 0);
    assert!(sink.pages().is_empty());
}

#[tokio::test]
async fn test_step_narrows_range_to_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(history_response(page(&[("c", 2600), ("b", 2500)], true)))
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let step = fetcher(&server, sink.clone())
        .step(&FetchRange::new(1000, 3000), None)
        .await
        .unwrap();

    assert_eq!(
        step,
        SweepStep::Continue {
            range: FetchRange::new(1000, 2500),
            cursor: Cursor {
                timestamp: 2500,
                entry_id: "b".to_string(),
            },
            entries: 2,
        }
    );
    assert_eq!(sink.pages().len(), 1);
}

#[tokio::test]
async fn test_stalled_cursor_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(history_response(page(&[("same", 2500)], true)))
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let result = fetcher(&server, sink).sweep(FetchRange::new(1000, 3000)).await;

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("stalled"));
}

#[tokio::test]
async fn test_successful_response_replaces_limiter_policies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(history_response(page(&[], false)))
        .mount(&server)
        .await;

    let limiter = Arc::new(RateLimiter::new());
    let client = history_client(&server, limiter.clone());
    client
        .fetch_page(&FetchRange::new(1000, 5000), None)
        .await
        .unwrap();

    assert_eq!(
        limiter.policies(),
        vec![
            Policy::new(15, Duration::from_secs(10)),
            Policy::new(30, Duration::from_secs(300)),
        ]
    );
    // one real hit; the longer window's extra usage sits outside the 10s window
    assert_eq!(limiter.state_summary(), "1:15:10, 2:30:300");
}

#[tokio::test]
async fn test_page_newer_than_range_end_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("from", "5000"))
        .respond_with(history_response(page(&[("z", 4500), ("x", 3000)], true)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("from", "3000"))
        .respond_with(history_response(page(&[("late", 3200), ("w", 2000)], true)))
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let err = fetcher(&server, sink.clone())
        .sweep(FetchRange::new(1000, 5000))
        .await
        .unwrap_err();

    assert!(matches!(err, FetcherError::InvalidResponse(_)));
    assert!(err.to_string().contains("after range end 3000"));
    // only the first, in-range page was handed on
    assert_eq!(sink.pages().len(), 1);
}

//! Continuous mode: cycle bounds, retries and shutdown

use std::sync::Arc;
use std::time::Duration;

use guild_stash_sync::crawler::CrawlDriver;
use guild_stash_sync::shutdown::ShutdownCoordinator;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    config_for, credentials, history_response, page, timestamps_body, HISTORY_PATH,
    TIMESTAMPS_PATH,
};

const LEAGUE_START: i64 = 1_000_000;
const LEAGUE_END: i64 = 2_000_000;
const UPPER: i64 = LEAGUE_END + 86_400;

/// `end` query values of the history requests received so far
async fn requested_ends(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == HISTORY_PATH)
        .filter_map(|request| {
            request
                .url
                .query_pairs()
                .find(|(key, _)| key == "end")
                .map(|(_, value)| value.into_owned())
        })
        .collect()
}

async fn wait_for_requests(server: &MockServer, count: usize) -> Vec<String> {
    for _ in 0..200 {
        let ends = requested_ends(server).await;
        if ends.len() >= count {
            return ends;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("expected {count} history requests");
}

async fn start_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TIMESTAMPS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(timestamps_body(
            Some(1_200_000),
            Some(1_500_000),
            LEAGUE_START,
            LEAGUE_END,
        )))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_cycles_advance_after_success_until_shutdown() {
    let server = start_server().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(history_response(page(&[], false)))
        .mount(&server)
        .await;

    let shutdown = ShutdownCoordinator::shared();
    let driver = Arc::new(
        CrawlDriver::new(
            config_for(&server).with_watch_interval(Duration::from_millis(50)),
            credentials(),
        )
        .unwrap()
        .with_shutdown(shutdown.clone()),
    );
    let watcher = tokio::spawn({
        let driver = driver.clone();
        async move { driver.run_continuous().await }
    });

    let ends = wait_for_requests(&server, 4).await;
    shutdown.request_shutdown();
    let report = watcher.await.unwrap().unwrap();
    driver.finish().await;

    // backfill below the stored span, then the first cycle from the stored latest;
    // the league is over, so later cycles start at the day after its end
    assert_eq!(ends[0], LEAGUE_START.to_string());
    assert_eq!(ends[1], "1500000");
    assert_eq!(ends[2], UPPER.to_string());
    assert_eq!(ends[3], UPPER.to_string());
    assert!(report.cycles >= 3);
}

#[tokio::test]
async fn test_failed_cycle_retries_same_range() {
    let server = start_server().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("end", "1500000"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(history_response(page(&[], false)))
        .with_priority(5)
        .mount(&server)
        .await;

    let shutdown = ShutdownCoordinator::shared();
    let driver = Arc::new(
        CrawlDriver::new(
            config_for(&server).with_watch_interval(Duration::from_millis(50)),
            credentials(),
        )
        .unwrap()
        .with_shutdown(shutdown.clone()),
    );
    let watcher = tokio::spawn({
        let driver = driver.clone();
        async move { driver.run_continuous().await }
    });

    let ends = wait_for_requests(&server, 4).await;
    shutdown.request_shutdown();
    let report = watcher.await.unwrap().unwrap();
    driver.finish().await;

    assert_eq!(ends[1], "1500000");
    assert_eq!(ends[2], "1500000");
    assert_eq!(ends[3], UPPER.to_string());
    assert!(report.cycles >= 2);
}

#[tokio::test]
async fn test_credential_error_ends_watch() {
    let server = start_server().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("end", "1500000"))
        .respond_with(ResponseTemplate::new(403))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(history_response(page(&[], false)))
        .with_priority(5)
        .mount(&server)
        .await;

    let driver = CrawlDriver::new(
        config_for(&server).with_watch_interval(Duration::from_millis(50)),
        credentials(),
    )
    .unwrap();

    let err = tokio::time::timeout(Duration::from_secs(10), driver.run_continuous())
        .await
        .unwrap()
        .unwrap_err();
    driver.finish().await;

    assert!(err.to_string().contains("HTTP 403"));
}

//! Single-run crawl planning and delivery end to end

use std::sync::Mutex;

use async_trait::async_trait;
use guild_stash_sync::crawler::{
    CrawlDriver, CrawlError, CredentialFailure, RemediationError, Remediator, RetryOrchestrator,
};
use guild_stash_sync::fetcher::CredentialKind;
use guild_stash_sync::shutdown::ShutdownCoordinator;
use guild_stash_sync::CredentialStore;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    config_for, credentials, history_response, page, timestamps_body, HISTORY_PATH,
    TIMESTAMPS_PATH, UPLOAD_PATH,
};

const LEAGUE_START: i64 = 1_000;
const LEAGUE_END: i64 = 5_000;
const UPPER: i64 = LEAGUE_END + 86_400;

async fn mount_timestamps(server: &MockServer, earliest: Option<i64>, latest: Option<i64>) {
    Mock::given(method("GET"))
        .and(path(TIMESTAMPS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(timestamps_body(
            earliest,
            latest,
            LEAGUE_START,
            LEAGUE_END,
        )))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_first_run_sweeps_whole_league() {
    let server = MockServer::start().await;
    mount_timestamps(&server, None, None).await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("from", UPPER.to_string()))
        .and(query_param("end", LEAGUE_START.to_string()))
        .respond_with(history_response(page(&[("a", 2_000)], false)))
        .expect(1)
        .mount(&server)
        .await;

    let driver = CrawlDriver::new(config_for(&server), credentials()).unwrap();
    let report = driver.run_once().await.unwrap();
    let delivery = driver.finish().await;

    assert_eq!(report.sweeps, 1);
    assert_eq!(report.pages, 1);
    assert_eq!(report.entries, 1);
    assert_eq!(delivery.enqueued, 0);
}

#[tokio::test]
async fn test_stored_span_sweeps_both_gaps_and_delivers_truncated_pages() {
    let server = MockServer::start().await;
    mount_timestamps(&server, Some(1_500), Some(2_500)).await;

    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("from", "1500"))
        .and(query_param("end", "1000"))
        .respond_with(history_response(page(&[("old", 1_200)], false)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("from", UPPER.to_string()))
        .and(query_param("end", "2500"))
        .respond_with(history_response(page(&[("n2", 4_000), ("n1", 3_000)], true)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("from", "3000"))
        .and(query_param("end", "2500"))
        .and(query_param("fromid", "n1"))
        .respond_with(history_response(page(&[("n0", 2_600)], false)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(UPLOAD_PATH))
        .and(header("authorization", "Bearer backend-secret"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"number_of_added_entries": 2})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let driver = CrawlDriver::new(config_for(&server), credentials()).unwrap();
    let report = driver.run_once().await.unwrap();
    let delivery = driver.finish().await;

    assert_eq!(report.sweeps, 2);
    assert_eq!(report.pages, 3);
    assert_eq!(report.entries, 4);
    assert_eq!(report.dispatched, 1);
    assert_eq!(delivery.delivered, 1);
    assert_eq!(delivery.pending(), 0);
}

#[tokio::test]
async fn test_rejected_backend_token_stops_before_crawling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TIMESTAMPS_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(history_response(page(&[], false)))
        .expect(0)
        .mount(&server)
        .await;

    let driver = CrawlDriver::new(config_for(&server), credentials()).unwrap();
    let err = driver.run_once().await.unwrap_err();

    assert!(matches!(err, CrawlError::Fetcher(_)));
    assert_eq!(err.credential_kind(), Some(CredentialKind::BackendToken));
    driver.finish().await;
}

#[tokio::test]
async fn test_shutdown_before_run_skips_sweeps() {
    let server = MockServer::start().await;
    mount_timestamps(&server, None, None).await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(history_response(page(&[], false)))
        .expect(0)
        .mount(&server)
        .await;

    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let driver = CrawlDriver::new(config_for(&server), credentials())
        .unwrap()
        .with_shutdown(shutdown);

    let report = driver.run_once().await.unwrap();
    assert_eq!(report.sweeps, 0);
    driver.finish().await;
}

struct FixedRemediator {
    store: CredentialStore,
    calls: Mutex<Vec<CredentialKind>>,
}

#[async_trait]
impl Remediator for FixedRemediator {
    async fn remediate(&self, kind: CredentialKind) -> Result<(), RemediationError> {
        self.calls.lock().unwrap().push(kind);
        self.store
            .replace(kind, "fresh")
            .map_err(|e| RemediationError::Invalid(e.to_string()))
    }
}

#[tokio::test]
async fn test_rejected_session_is_replaced_and_run_retried() {
    let server = MockServer::start().await;
    mount_timestamps(&server, None, None).await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(header("cookie", "POESESSID=fresh"))
        .respond_with(history_response(page(&[("a", 2_000)], false)))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(5)
        .expect(1)
        .mount(&server)
        .await;

    let store = credentials();
    let driver = CrawlDriver::new(config_for(&server), store.clone()).unwrap();
    let remediator = FixedRemediator {
        store: store.clone(),
        calls: Mutex::new(Vec::new()),
    };

    let report = RetryOrchestrator::default()
        .run(|| driver.run_once(), &remediator)
        .await
        .unwrap();
    driver.finish().await;

    assert_eq!(report.sweeps, 1);
    assert_eq!(*remediator.calls.lock().unwrap(), vec![CredentialKind::Session]);
    assert_eq!(store.session_id(), "fresh");
}

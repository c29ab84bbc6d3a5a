//! Shared fixtures for integration tests

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use guild_stash_sync::crawler::RateLimiter;
use guild_stash_sync::fetcher::StashHistoryClient;
use guild_stash_sync::sink::PageSink;
use guild_stash_sync::{CrawlerConfig, CredentialStore, Credentials};
use serde_json::{json, Value};
use wiremock::{MockServer, ResponseTemplate};

pub const GUILD_ID: &str = "408208";
pub const HISTORY_PATH: &str = "/api/guild/408208/stash/history";
pub const UPLOAD_PATH: &str = "/current/guilds/408208/stash-history";
pub const TIMESTAMPS_PATH: &str = "/current/guilds/408208/stash-history/latest_timestamp";

/// Sink keeping every dispatched page in memory
#[derive(Default)]
pub struct RecordingSink {
    pages: Mutex<Vec<Bytes>>,
}

impl RecordingSink {
    pub fn pages(&self) -> Vec<Value> {
        self.pages
            .lock()
            .unwrap()
            .iter()
            .map(|body| serde_json::from_slice(body).unwrap())
            .collect()
    }
}

impl PageSink for RecordingSink {
    fn dispatch(&self, body: Bytes) {
        self.pages.lock().unwrap().push(body);
    }
}

pub fn entry(id: &str, time: i64) -> Value {
    json!({
        "id": id,
        "time": time,
        "league": "Mercenaries",
        "stash": "Currency",
        "item": "Chaos Orb",
        "action": "added",
        "account": {"name": "member"},
        "x": 0,
        "y": 0
    })
}

pub fn page(entries: &[(&str, i64)], truncated: bool) -> Value {
    json!({
        "entries": entries.iter().map(|(id, time)| entry(id, *time)).collect::<Vec<_>>(),
        "truncated": truncated
    })
}

/// 200 response carrying rate limit headers for two policies
pub fn history_response(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("X-Rate-Limit-Account", "15:10:60,30:300:1800")
        .insert_header("X-Rate-Limit-Account-State", "1:10:0,2:300:0")
        .set_body_json(body)
}

pub fn credentials() -> CredentialStore {
    CredentialStore::new(Credentials::new("sess", "backend-secret", GUILD_ID).unwrap())
}

pub fn config_for(server: &MockServer) -> CrawlerConfig {
    CrawlerConfig::default()
        .with_poe_base_url(server.uri())
        .with_backend_base_url(server.uri())
}

pub fn history_client(server: &MockServer, limiter: Arc<RateLimiter>) -> StashHistoryClient {
    let config = Arc::new(config_for(server));
    let client = config.build_http_client().unwrap();
    StashHistoryClient::new(client, config, credentials(), limiter)
}

pub fn timestamps_body(
    earliest: Option<i64>,
    latest: Option<i64>,
    league_start: i64,
    league_end: i64,
) -> Value {
    json!({
        "earliest": earliest,
        "latest": latest,
        "league_start": league_start,
        "league_end": league_end
    })
}

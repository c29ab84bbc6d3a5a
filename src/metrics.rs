//! Observability metrics for the stash history crawler
//!
//! Tracks request outcomes per endpoint, 429s, credential failures, rate
//! limiter waits, fetched pages and sink deliveries.
//!
//! ## Architecture
//!
//! - Uses `metrics` crate macros; without an installed recorder they are no-ops
//! - Optional Prometheus exporter serving a scrape endpoint (`--metrics-addr`)

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::fetcher::{CredentialKind, Endpoint};

static METRICS_INITIALIZED: OnceCell<SocketAddr> = OnceCell::new();

static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Install the Prometheus exporter
///
/// Must be called from within a Tokio runtime. Calling it again is a no-op.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Some(existing) = METRICS_INITIALIZED.get() {
        debug!(addr = %existing, "Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "HTTP requests by endpoint and status"
    );
    describe_counter!(
        "http_429_errors_total",
        Unit::Count,
        "Responses with status 429"
    );
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "credential_errors_total",
        Unit::Count,
        "Requests rejected because of a credential, by kind"
    );
    describe_histogram!(
        "rate_limit_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for the rate limiter"
    );
    describe_gauge!(
        "rate_limit_active_policies",
        Unit::Count,
        "Policies reported by the last successful response"
    );
    describe_counter!(
        "history_pages_total",
        Unit::Count,
        "History pages fetched, by truncation"
    );
    describe_counter!(
        "history_entries_total",
        Unit::Count,
        "History entries fetched"
    );
    describe_counter!(
        "sink_deliveries_total",
        Unit::Count,
        "Pages delivered to the backend, by outcome"
    );
    describe_counter!(
        "watch_cycles_total",
        Unit::Count,
        "Continuous-mode cycles, by outcome"
    );

    let _ = METRICS_INITIALIZED.set(addr);
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Timing and outcome of one HTTP request
pub struct HttpRequestMetrics {
    endpoint: Endpoint,
    start_time: Instant,
    correlation_id: String,
}

impl HttpRequestMetrics {
    /// Start recording a request
    pub fn start(endpoint: Endpoint) -> Self {
        let correlation_id = generate_correlation_id();
        debug!(
            correlation_id = %correlation_id,
            endpoint = endpoint.as_str(),
            "Starting HTTP request"
        );
        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
        }
    }

    /// Record a response status
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();
        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.as_str(),
            "status" => status_code.to_string(),
        )
        .increment(1);
        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.as_str(),
        )
        .record(duration.as_secs_f64());

        if status_code == 429 {
            counter!("http_429_errors_total", "endpoint" => self.endpoint.as_str()).increment(1);
            warn!(
                correlation_id = %self.correlation_id,
                endpoint = self.endpoint.as_str(),
                duration_ms = duration.as_millis() as u64,
                "Rate limit error (429) recorded"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = self.endpoint.as_str(),
            status = status_code,
            duration_ms = duration.as_millis() as u64,
            "HTTP request completed"
        );
    }

    /// Record a request that produced no response
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();
        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.as_str(),
            "status" => "network_error",
        )
        .increment(1);
        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.as_str(),
        )
        .record(duration.as_secs_f64());
        warn!(
            correlation_id = %self.correlation_id,
            endpoint = self.endpoint.as_str(),
            duration_ms = duration.as_millis() as u64,
            "Network error recorded"
        );
    }

    /// Correlation ID of this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record a credential rejection
pub fn record_credential_error(kind: CredentialKind) {
    counter!("credential_errors_total", "kind" => kind.as_str()).increment(1);
}

/// Record time spent in the rate limiter
pub fn record_rate_limit_wait(waited: Duration) {
    histogram!("rate_limit_wait_seconds").record(waited.as_secs_f64());
}

/// Record the size of a freshly reported policy set
pub fn record_policy_update(policies: usize) {
    gauge!("rate_limit_active_policies").set(policies as f64);
}

/// Record a fetched history page
pub fn record_page(entries: usize, truncated: bool) {
    counter!(
        "history_pages_total",
        "truncated" => if truncated { "true" } else { "false" },
    )
    .increment(1);
    counter!("history_entries_total").increment(entries as u64);
}

/// Record a backend delivery outcome (`delivered` / `failed`)
pub fn record_sink_delivery(outcome: &'static str) {
    counter!("sink_deliveries_total", "outcome" => outcome).increment(1);
}

/// Record a continuous-mode cycle outcome
pub fn record_watch_cycle(outcome: &'static str) {
    counter!("watch_cycles_total", "outcome" => outcome).increment(1);
}

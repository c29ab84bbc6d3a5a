//! Channel-backed sink posting pages to the backend
//!
//! Pages are queued on an unbounded channel and posted one at a time by a
//! single worker task. [`BackendSink::flush`] waits until everything queued
//! before the call has been handled; [`BackendSink::shutdown`] closes the
//! queue, drains it and reports delivery counts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::CrawlerConfig;
use crate::credentials::CredentialStore;
use crate::fetcher::{error_for_response, Endpoint, FetcherError, FetcherResult};
use crate::metrics::HttpRequestMetrics;
use crate::sink::PageSink;

enum SinkMessage {
    Page(Bytes),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct SinkCounters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl SinkCounters {
    fn snapshot(&self) -> SinkStats {
        SinkStats {
            enqueued: self.enqueued.load(Ordering::SeqCst),
            delivered: self.delivered.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    /// Pages accepted by `dispatch`
    pub enqueued: u64,
    /// Pages the backend accepted
    pub delivered: u64,
    /// Pages dropped after a failed delivery
    pub failed: u64,
}

impl SinkStats {
    /// Pages queued but not yet handled
    pub fn pending(&self) -> u64 {
        self.enqueued
            .saturating_sub(self.delivered)
            .saturating_sub(self.failed)
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    number_of_added_entries: u64,
}

/// Sink posting pages to `POST {backend}/current/guilds/{guild}/stash-history`
#[derive(Debug)]
pub struct BackendSink {
    sender: Mutex<Option<mpsc::UnboundedSender<SinkMessage>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<SinkCounters>,
}

impl std::fmt::Debug for SinkMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkMessage::Page(body) => write!(f, "Page({} bytes)", body.len()),
            SinkMessage::Flush(_) => f.write_str("Flush"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BackendSink {
    /// Start the delivery worker
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(client: Client, config: Arc<CrawlerConfig>, credentials: CredentialStore) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(SinkCounters::default());
        let worker = SinkWorker {
            client,
            config,
            credentials,
            counters: counters.clone(),
        };

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(tokio::spawn(worker.run(receiver)))),
            counters,
        }
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<SinkMessage>> {
        lock(&self.sender).clone()
    }

    /// Wait until every page dispatched before this call has been handled
    pub async fn flush(&self) {
        let Some(sender) = self.sender() else {
            return;
        };
        let (ack, done) = oneshot::channel();
        if sender.send(SinkMessage::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Close the queue, wait for the worker to drain it and return final counts
    ///
    /// Pages dispatched afterwards are dropped with a warning.
    pub async fn shutdown(&self) -> SinkStats {
        drop(lock(&self.sender).take());
        let worker = lock(&self.worker).take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sink worker terminated abnormally");
            }
        }
        self.stats()
    }

    /// Current counts
    pub fn stats(&self) -> SinkStats {
        self.counters.snapshot()
    }
}

impl PageSink for BackendSink {
    fn dispatch(&self, body: Bytes) {
        let Some(sender) = self.sender() else {
            warn!(bytes = body.len(), "Sink is shut down, dropping page");
            return;
        };
        let bytes = body.len();
        if sender.send(SinkMessage::Page(body)).is_ok() {
            self.counters.enqueued.fetch_add(1, Ordering::SeqCst);
            debug!(bytes, "Page queued for delivery");
        } else {
            warn!(bytes, "Sink worker stopped, dropping page");
        }
    }
}

struct SinkWorker {
    client: Client,
    config: Arc<CrawlerConfig>,
    credentials: CredentialStore,
    counters: Arc<SinkCounters>,
}

impl SinkWorker {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<SinkMessage>) {
        while let Some(message) = receiver.recv().await {
            match message {
                SinkMessage::Page(body) => match self.deliver(body).await {
                    Ok(()) => {
                        self.counters.delivered.fetch_add(1, Ordering::SeqCst);
                        crate::metrics::record_sink_delivery("delivered");
                    }
                    Err(e) => {
                        self.counters.failed.fetch_add(1, Ordering::SeqCst);
                        crate::metrics::record_sink_delivery("failed");
                        warn!(error = %e, "Failed to deliver page to backend");
                    }
                },
                SinkMessage::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!("Sink worker finished");
    }

    async fn deliver(&self, body: Bytes) -> FetcherResult<()> {
        let credentials = self.credentials.snapshot();
        let url = self.config.upload_url(credentials.guild_id());

        let request_metrics = HttpRequestMetrics::start(Endpoint::HistoryUpload);
        let response = self
            .client
            .post(&url)
            .bearer_auth(credentials.backend_token())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                request_metrics.record_network_error();
                FetcherError::NetworkError(e.to_string())
            })?;

        let status = response.status();
        request_metrics.record_complete(status.as_u16());
        if !status.is_success() {
            return Err(error_for_response(Endpoint::HistoryUpload, response).await);
        }

        match response.json::<UploadResponse>().await {
            Ok(upload) => debug!(
                added = upload.number_of_added_entries,
                "Backend stored page"
            ),
            Err(_) => debug!(status = status.as_u16(), "Backend accepted page"),
        }
        Ok(())
    }
}

//! Delivery of fetched pages to durable storage

use bytes::Bytes;

pub mod backend;

pub use backend::{BackendSink, SinkStats};

/// Destination for truncated history pages
///
/// `dispatch` hands the raw page body over and returns immediately; delivery
/// happens elsewhere and its failures never reach the crawl.
pub trait PageSink: Send + Sync {
    /// Queue a page for delivery
    fn dispatch(&self, body: Bytes);
}

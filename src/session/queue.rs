//! Outbound request pacing and the session hook seam.
//!
//! SIGAA deployments throttle and occasionally ban clients that hammer
//! them, and the portal's JSF state is sensitive to request interleaving,
//! so outbound requests pass through a width-bounded FIFO gate (width 1 =
//! fully serialized, the default). The gate is fair: waiters proceed in
//! arrival order, so no caller is starved.
//!
//! The queue also defines [`RequestHooks`], the single seam through which
//! cache lookups, cookie handling and bond routing are injected around the
//! transport. The transport itself knows nothing about caches or bonds.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::HeaderMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;
use url::Url;

use crate::error::SigaaError;
use crate::page::Page;

/// Default number of requests allowed in flight toward the portal.
pub const DEFAULT_QUEUE_WIDTH: usize = 1;

/// Everything the hooks may need to know about one outbound request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// HTTP method.
    pub method: Method,
    /// Fully resolved request URL.
    pub url: Url,
    /// Encoded request body, for urlencoded POSTs.
    pub body: Option<String>,
    /// Bypass the cache read for this request (results are still stored).
    pub no_cache: bool,
    /// Present the mobile client identifier; the portal renders different
    /// markup for mobile clients.
    pub mobile: bool,
    /// Bond the issuing handle was scoped to when the request was made;
    /// cache reads and writes land in this bond's partition.
    pub bond: Option<Url>,
    /// Keep the response out of the cache entirely. Multipart bodies are
    /// consumed on send and have no stable fingerprint.
    pub(crate) skip_store: bool,
}

impl RequestDescriptor {
    pub(crate) fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            body: None,
            no_cache: false,
            mobile: false,
            bond: None,
            skip_store: false,
        }
    }

    pub(crate) fn bond_key(&self) -> Option<&str> {
        self.bond.as_ref().map(Url::as_str)
    }
}

/// Hook points invoked around every request and download.
///
/// # Object Safety
///
/// Uses `async_trait` to support dynamic dispatch via `Arc<dyn
/// RequestHooks>`. Rust 2024 native async traits are not object-safe, so
/// `async_trait` is required for the seam.
///
/// All methods default to no-ops; implementors override the points they
/// care about.
#[async_trait]
pub trait RequestHooks: Send + Sync {
    /// Runs before the HTTP options are final; may add request headers.
    async fn before_options(&self, request: &RequestDescriptor, headers: &mut HeaderMap) {
        let _ = (request, headers);
    }

    /// Runs before the network call; returning a page short-circuits the
    /// request entirely (this is where cache reads happen).
    async fn before_request(&self, request: &RequestDescriptor) -> Option<Arc<Page>> {
        let _ = request;
        None
    }

    /// Runs after a response was turned into a page (cookie capture and
    /// cache writes happen here).
    async fn after_success(&self, request: &RequestDescriptor, page: &Arc<Page>) {
        let _ = (request, page);
    }

    /// Runs after a request failed.
    async fn after_failure(&self, request: &RequestDescriptor, error: &SigaaError) {
        let _ = (request, error);
    }

    /// Runs before a file download hits the network.
    async fn before_download(&self, request: &RequestDescriptor, destination: &Path) {
        let _ = (request, destination);
    }

    /// Runs after a downloaded file was persisted to its final path.
    async fn after_download(&self, request: &RequestDescriptor, file: &Path) {
        let _ = (request, file);
    }
}

/// Width-bounded FIFO gate for outbound requests.
///
/// Designed to be shared behind `Arc`. A caller that awaits
/// [`RequestQueue::acquire`] between its own requests observes its
/// submissions dispatched in order; across independent concurrent callers
/// the gate guarantees fairness, not total order.
#[derive(Debug)]
pub struct RequestQueue {
    permits: Arc<Semaphore>,
}

/// Held while a request is in flight; dropping it releases the slot.
#[derive(Debug)]
pub struct QueuePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl RequestQueue {
    /// Creates a queue allowing `width` requests in flight (minimum 1).
    #[must_use]
    pub fn new(width: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(width.max(1))),
        }
    }

    /// Waits for a dispatch slot. Waiters are served in arrival order.
    pub async fn acquire(&self, request: &RequestDescriptor) -> QueuePermit {
        trace!(method = %request.method, url = %request.url, "waiting for dispatch slot");
        match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => QueuePermit {
                _permit: Some(permit),
            },
            // The queue never closes its semaphore; if it somehow is,
            // proceed unthrottled rather than deadlock the session.
            Err(_) => QueuePermit { _permit: None },
        }
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_WIDTH)
    }
}

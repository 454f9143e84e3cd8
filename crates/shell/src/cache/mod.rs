//! Offline cache orchestrator.
//!
//! A stale-while-revalidate HTTP cache sitting between clients and the
//! upstream static site.
//!
//! # Architecture
//!
//! - [`CacheStorage`] - Named, versioned stores of responses (`moka`)
//! - [`PrecacheManifest`] - Fixed list of URLs installed up front
//! - [`Fetcher`] - The network; [`UpstreamFetcher`] forwards with `reqwest`
//! - [`CacheOrchestrator`] - One generation: install, activate, intercept
//! - [`CacheController`] - Holds the active and waiting generations
//!
//! # Lifecycle
//!
//! ```text
//! Parsed -> Installing -> Installed -> Activating -> Activated
//!               |              |
//!               v              v
//!           Redundant  <-  (superseded)
//! ```
//!
//! Install is all-or-nothing: every manifest URL is fetched and staged in
//! memory, and the version-named store only appears once every fetch
//! succeeded. Activation deletes every other store.

mod controller;
mod manifest;
mod network;
mod orchestrator;
mod storage;

pub use controller::{CacheController, ControllerStatus, GenerationStatus, RegisterOutcome};
pub use manifest::{ManifestError, PrecacheManifest};
pub use network::{FetchError, Fetcher, UpstreamFetcher};
pub use orchestrator::{CacheOrchestrator, FetchOutcome, LifecycleState, Scope};
pub use storage::{CacheLimits, CacheStorage, ResponseCache};

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode, header};
use thiserror::Error;
use url::Url;

/// Errors raised by the cache subsystem.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The pre-cache manifest is unusable.
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// A pre-cache URL could not be fetched.
    #[error("Pre-cache fetch failed for {url}: {source}")]
    PrecacheFetch {
        url: String,
        #[source]
        source: FetchError,
    },

    /// A pre-cache URL answered with a non-success status.
    #[error("Pre-cache fetch for {url} returned {status}")]
    PrecacheStatus { url: String, status: StatusCode },

    /// A response body exceeds the per-entry limit.
    #[error("Response for {url} is too large to cache ({size} bytes, limit {limit})")]
    EntryTooLarge {
        url: String,
        size: usize,
        limit: usize,
    },

    /// The store was deleted while a write was in flight.
    #[error("Cache store {0} no longer exists")]
    StoreDeleted(String),

    /// The requested store does not exist.
    #[error("Cache store {0} not found")]
    StoreNotFound(String),

    /// A lifecycle transition was attempted from the wrong state.
    #[error("Cannot {action} a generation that is {state}")]
    InvalidState {
        action: &'static str,
        state: LifecycleState,
    },
}

/// A request as seen by the orchestrator.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CacheRequest {
    /// A bodiless GET for `url`.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Whether the client said it accepts an HTML document.
    #[must_use]
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains("text/html"))
    }

    /// The key this request's response is stored under.
    #[must_use]
    pub fn cache_key(&self) -> String {
        cache_key(&self.url)
    }
}

/// A stored or freshly fetched response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Final URL after redirects, expressed on the public origin when the
    /// response came from upstream.
    pub url: Url,
}

impl CachedResponse {
    /// Size of the body in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

/// Cache key for a URL: the URL without its fragment.
#[must_use]
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

/// Same scheme, host and port.
#[must_use]
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

/// Headers that describe a single connection and must not be forwarded or
/// stored.
pub(crate) fn is_hop_by_hop(name: &header::HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

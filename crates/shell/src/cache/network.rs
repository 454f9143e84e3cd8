//! The network side of fetch interception.
//!
//! [`UpstreamFetcher`] forwards requests for the public origin to the
//! upstream static site with `reqwest`, and maps the final URL back onto the
//! public origin so same-origin checks see what a browser would see.
//! Requests for any other origin are refused; the shell is not a forward
//! proxy.

use std::time::Duration;

use axum::http::{HeaderMap, header};
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{CacheRequest, CachedResponse, is_hop_by_hop, same_origin};

/// Errors that can occur when fetching from the network.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Could not reach the server (DNS, connect, timeout, reset).
    #[error("Network unreachable: {0}")]
    Unreachable(String),

    /// The server answered but the response could not be read.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The fetch task ended before producing a response.
    #[error("Fetch aborted: {0}")]
    Aborted(String),

    /// The URL is not on the origin this fetcher serves.
    #[error("Refusing to fetch {0}: not the public origin")]
    Refused(String),
}

/// Something that can perform a network request.
///
/// Futures are boxed and `'static` so a fetch can outlive the request that
/// started it (background revalidation).
pub trait Fetcher: Send + Sync + 'static {
    /// Perform `request` against the network.
    fn fetch(&self, request: CacheRequest) -> BoxFuture<'static, Result<CachedResponse, FetchError>>;
}

/// Forwards requests to the upstream origin.
#[derive(Clone)]
pub struct UpstreamFetcher {
    client: reqwest::Client,
    public_origin: Url,
    upstream_origin: Url,
}

impl UpstreamFetcher {
    /// Create a fetcher for `public_origin`, served by `upstream_origin`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        public_origin: Url,
        upstream_origin: Url,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::InvalidResponse(format!("failed to build client: {e}")))?;
        Ok(Self {
            client,
            public_origin,
            upstream_origin,
        })
    }

    /// Where a request for `url` is actually sent.
    fn upstream_url(&self, url: &Url) -> Result<Url, FetchError> {
        if same_origin(url, &self.public_origin) {
            Ok(rebase(url, &self.upstream_origin))
        } else {
            Err(FetchError::Refused(url.to_string()))
        }
    }

    /// The URL a response is attributed to, as clients see it.
    fn public_url(&self, url: &Url) -> Url {
        if same_origin(url, &self.upstream_origin) {
            rebase(url, &self.public_origin)
        } else {
            url.clone()
        }
    }
}

impl Fetcher for UpstreamFetcher {
    fn fetch(&self, request: CacheRequest) -> BoxFuture<'static, Result<CachedResponse, FetchError>> {
        let this = self.clone();
        Box::pin(async move { this.send(request).await })
    }
}

impl UpstreamFetcher {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: CacheRequest) -> Result<CachedResponse, FetchError> {
        let target = self.upstream_url(&request.url).inspect_err(|e| {
            warn!(error = %e, "Cross-origin fetch refused");
        })?;

        let response = self
            .client
            .request(request.method, target.as_str())
            .headers(forwardable(&request.headers))
            .body(request.body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, target = %target, "Upstream fetch failed");
                FetchError::Unreachable(e.to_string())
            })?;

        let status = response.status();
        let final_url = self.public_url(response.url());
        let headers = forwardable(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;

        debug!(status = %status, bytes = body.len(), "Upstream responded");

        Ok(CachedResponse {
            status,
            headers,
            body,
            url: final_url,
        })
    }
}

/// Replace scheme, host and port of `url` with those of `origin`.
fn rebase(url: &Url, origin: &Url) -> Url {
    let mut rebased = origin.clone();
    rebased.set_path(url.path());
    rebased.set_query(url.query());
    rebased.set_fragment(None);
    rebased
}

/// Copy headers minus hop-by-hop ones, `host`, and `content-length`
/// (recomputed from the body).
fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

#[cfg(test)]
pub(crate) mod testing {
    //! An in-process network for unit tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode};
    use futures::future::BoxFuture;

    use super::{FetchError, Fetcher};
    use crate::cache::{CacheRequest, CachedResponse};

    /// Serves bodies from a map keyed by URL; unknown URLs are 404.
    #[derive(Clone, Default)]
    pub struct MapNetwork {
        pages: Arc<Mutex<HashMap<String, (StatusCode, String)>>>,
        offline: Arc<AtomicBool>,
        failing: Arc<Mutex<Vec<String>>>,
        pub calls: Arc<AtomicUsize>,
    }

    impl MapNetwork {
        pub fn serve(&self, url: &str, body: &str) {
            self.pages
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(url.to_string(), (StatusCode::OK, body.to_string()));
        }

        pub fn fail(&self, url: &str) {
            self.failing
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(url.to_string());
        }

        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }
    }

    impl Fetcher for MapNetwork {
        fn fetch(
            &self,
            request: CacheRequest,
        ) -> BoxFuture<'static, Result<CachedResponse, FetchError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let key = request.url.to_string();
            let offline = self.offline.load(Ordering::SeqCst);
            let failing = self
                .failing
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .contains(&key);
            let page = self
                .pages
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .get(&key)
                .cloned();
            Box::pin(async move {
                tokio::task::yield_now().await;
                if offline || failing {
                    return Err(FetchError::Unreachable(key));
                }
                let (status, body) = page.unwrap_or((StatusCode::NOT_FOUND, String::new()));
                Ok(CachedResponse {
                    status,
                    headers: HeaderMap::new(),
                    body: Bytes::from(body),
                    url: request.url,
                })
            })
        }
    }
}

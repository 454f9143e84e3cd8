//! Integration tests for the site shell.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p site-shell-integration-tests
//! ```
//!
//! No external services are needed: the upstream site is a [`FakeNetwork`]
//! and cart storage lives in a temporary directory.
//!
//! # Test Categories
//!
//! - `cart_persistence` - Cart store against `FileStore`, restarts, failures
//! - `cart_http` - Cart routes, fragments and the event stream
//! - `cache_http` - Interception, offline fallback and generation control

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode, header};
use axum::response::Response;
use futures::future::BoxFuture;
use secrecy::SecretString;
use site_shell::cache::{CacheRequest, CachedResponse, FetchError, Fetcher};
use site_shell::config::ShellConfig;
use site_shell::state::AppState;
use site_shell::storage::{FileStore, KeyValueStore};
use tempfile::TempDir;
use tower::ServiceExt;
use url::Url;

/// Public origin used by every test.
pub const ORIGIN: &str = "https://site.test";

/// Control token configured on every test shell.
pub const CONTROL_TOKEN: &str = "test-control-token";

/// An upstream site served from memory.
///
/// Unknown URLs answer 404. While offline every fetch fails as unreachable.
#[derive(Clone, Default)]
pub struct FakeNetwork {
    pages: Arc<Mutex<HashMap<String, (String, String)>>>,
    offline: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl FakeNetwork {
    /// A small site with a home page, assets and an offline page.
    #[must_use]
    pub fn site() -> Self {
        let network = Self::default();
        network.serve("/", "text/html", "<h1>home</h1>");
        network.serve("/index.html", "text/html", "<h1>home</h1>");
        network.serve("/css/app.css", "text/css", "body{}");
        network.serve("/js/app.js", "text/javascript", "init()");
        network.serve("/offline.html", "text/html", "<h1>offline</h1>");
        network
    }

    /// Serve `body` at `path` on the public origin.
    pub fn serve(&self, path: &str, content_type: &str, body: &str) {
        let url = format!("{ORIGIN}{path}");
        self.serve_url(&url, content_type, body);
    }

    /// Serve `body` at an absolute URL, possibly cross-origin.
    pub fn serve_url(&self, url: &str, content_type: &str, body: &str) {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), (content_type.to_string(), body.to_string()));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of fetches performed so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for FakeNetwork {
    fn fetch(&self, request: CacheRequest) -> BoxFuture<'static, Result<CachedResponse, FetchError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let offline = self.offline.load(Ordering::SeqCst);
        let page = self
            .pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request.url.as_str())
            .cloned();

        Box::pin(async move {
            tokio::task::yield_now().await;
            if offline {
                return Err(FetchError::Unreachable(request.url.to_string()));
            }
            let mut headers = HeaderMap::new();
            let (status, body) = match page {
                Some((content_type, body)) => {
                    headers.insert(
                        header::CONTENT_TYPE,
                        HeaderValue::from_str(&content_type).unwrap(),
                    );
                    (StatusCode::OK, body)
                }
                None => (StatusCode::NOT_FOUND, String::new()),
            };
            Ok(CachedResponse {
                status,
                headers,
                body: Bytes::from(body),
                url: request.url,
            })
        })
    }
}

/// A shell wired to a [`FakeNetwork`] with storage in a temp directory.
pub struct TestContext {
    pub network: FakeNetwork,
    pub state: AppState,
    pub app: Router,
    pub config: ShellConfig,
    dir: TempDir,
}

impl TestContext {
    /// Manifest installed by [`TestContext::register`].
    pub const MANIFEST: &'static str = r#"{
        "version": "v1",
        "offlinePage": "/offline.html",
        "urls": ["/", "/index.html", "/css/app.css", "/js/app.js"]
    }"#;

    /// A context with immediate takeover and no generation installed.
    #[must_use]
    pub fn new() -> Self {
        Self::with_takeover(true)
    }

    #[must_use]
    pub fn with_takeover(immediate: bool) -> Self {
        Self::configured(|config| config.cache.immediate_takeover = immediate)
    }

    /// A context whose configuration is adjusted by `adjust` before the
    /// shell is built.
    #[must_use]
    pub fn configured(adjust: impl FnOnce(&mut ShellConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let network = FakeNetwork::site();
        let mut config = config_in(&dir);
        adjust(&mut config);
        std::fs::write(&config.cache.manifest_path, Self::MANIFEST).unwrap();

        let storage: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&config.data_dir).unwrap());
        let state = AppState::new(config.clone(), storage, Arc::new(network.clone()));
        let app = site_shell::app(state.clone());

        Self {
            network,
            state,
            app,
            config,
            dir,
        }
    }

    /// Rebuild the shell over the same data directory, as after a restart.
    #[must_use]
    pub fn restart(self) -> Self {
        let storage: Arc<dyn KeyValueStore> =
            Arc::new(FileStore::open(&self.config.data_dir).unwrap());
        let state = AppState::new(self.config.clone(), storage, Arc::new(self.network.clone()));
        let app = site_shell::app(state.clone());
        Self {
            state,
            app,
            ..self
        }
    }

    /// Install the manifest on disk.
    pub async fn register(&self) {
        let manifest = self.state.load_manifest().unwrap();
        self.state.cache().register(manifest).await.unwrap();
    }

    /// Replace the manifest on disk with a new version.
    pub fn write_manifest(&self, version: &str, urls: &[&str]) {
        let json = serde_json::json!({
            "version": version,
            "offlinePage": "/offline.html",
            "urls": urls,
        });
        std::fs::write(&self.config.cache.manifest_path, json.to_string()).unwrap();
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    /// Send a request through the full router.
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, path: &str) -> Response {
        self.send(Request::get(path).body(Body::empty()).unwrap()).await
    }

    /// A GET that accepts HTML, as a browser navigation does.
    pub async fn navigate(&self, path: &str) -> Response {
        self.send(
            Request::get(path)
                .header(header::ACCEPT, "text/html,application/xhtml+xml")
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post_form(&self, path: &str, form: &str) -> Response {
        self.send(
            Request::post(path)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form.to_string()))
                .unwrap(),
        )
        .await
    }

    /// An authorized POST to a `/_shell` control endpoint.
    pub async fn post_control(&self, path: &str) -> Response {
        self.send(
            Request::post(path)
                .header(header::AUTHORIZATION, format!("Bearer {CONTROL_TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post_json(&self, path: &str, json: &serde_json::Value) -> Response {
        self.send(
            Request::post(path)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
        )
        .await
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

fn config_in(dir: &TempDir) -> ShellConfig {
    let mut config = ShellConfig::new(
        Url::parse(ORIGIN).unwrap(),
        Url::parse("http://127.0.0.1:9").unwrap(),
    );
    config.data_dir = dir.path().join("data");
    config.cache.manifest_path = dir.path().join("precache.json");
    config.upstream_timeout = Duration::from_secs(1);
    config.control_token = Some(SecretString::from(CONTROL_TOKEN.to_string()));
    config
}

/// Read a whole response body as text.
pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Poll `check` until it holds; background cache refreshes are not awaited
/// by the request that started them.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true");
}

//! One cache generation: install, activate, and fetch interception.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::try_join_all;
use serde::Serialize;
use site_shell_core::CacheVersion;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::{
    CacheError, CacheRequest, CacheStorage, CachedResponse, FetchError, Fetcher,
    PrecacheManifest, ResponseCache, cache_key, same_origin,
};

/// Lifecycle of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        };
        f.write_str(s)
    }
}

/// Which requests a generation intercepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// The public origin; only its requests are intercepted.
    pub origin: Url,
    /// Path prefix that always goes straight to the network.
    pub admin_path: String,
    /// Prefix of store names.
    pub store_prefix: String,
}

impl Scope {
    fn is_admin_path(&self, path: &str) -> bool {
        let admin = self.admin_path.trim_end_matches('/');
        !admin.is_empty()
            && (path == admin
                || path
                    .strip_prefix(admin)
                    .is_some_and(|rest| rest.starts_with('/')))
    }
}

/// How a request was answered.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Served from the store; a background refresh was started.
    Hit(CachedResponse),
    /// Nothing cached; served from the network.
    Network(CachedResponse),
    /// Network failed on a navigation; served the fallback document.
    Offline(CachedResponse),
    /// Not intercepted; straight from the network.
    Bypass(CachedResponse),
    /// Network failed and there was nothing to substitute.
    Failed(FetchError),
}

impl FetchOutcome {
    /// The response to send, if any.
    #[must_use]
    pub const fn response(&self) -> Option<&CachedResponse> {
        match self {
            Self::Hit(r) | Self::Network(r) | Self::Offline(r) | Self::Bypass(r) => Some(r),
            Self::Failed(_) => None,
        }
    }

    /// Short label for headers and logs.
    #[must_use]
    pub const fn source(&self) -> &'static str {
        match self {
            Self::Hit(_) => "hit",
            Self::Network(_) => "miss",
            Self::Offline(_) => "offline",
            Self::Bypass(_) => "bypass",
            Self::Failed(_) => "error",
        }
    }
}

/// A single installed generation of the offline cache.
pub struct CacheOrchestrator {
    version: CacheVersion,
    store_name: String,
    manifest: PrecacheManifest,
    scope: Scope,
    storage: CacheStorage,
    network: Arc<dyn Fetcher>,
    state: RwLock<LifecycleState>,
}

impl CacheOrchestrator {
    /// Create a generation for `manifest`. Nothing is fetched yet.
    #[must_use]
    pub fn new(
        manifest: PrecacheManifest,
        scope: Scope,
        storage: CacheStorage,
        network: Arc<dyn Fetcher>,
    ) -> Self {
        let version = manifest.version().clone();
        let store_name = version.store_name(&scope.store_prefix);
        Self {
            version,
            store_name,
            manifest,
            scope,
            storage,
            network,
            state: RwLock::new(LifecycleState::Parsed),
        }
    }

    #[must_use]
    pub const fn version(&self) -> &CacheVersion {
        &self.version
    }

    #[must_use]
    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    #[must_use]
    pub const fn manifest(&self) -> &PrecacheManifest {
        &self.manifest
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
        debug!(version = %self.version, %state, "Generation state changed");
    }

    /// Mark this generation as no longer in use.
    pub fn mark_redundant(&self) {
        self.set_state(LifecycleState::Redundant);
    }

    /// Fetch every manifest URL and commit them as one store.
    ///
    /// All fetches run concurrently and are staged in memory. The store only
    /// becomes visible under its name when every fetch succeeded with a
    /// success status; otherwise no store is created and the generation is
    /// redundant.
    ///
    /// # Errors
    ///
    /// Returns the first failing fetch, a non-success status, an invalid
    /// manifest, or an entry over the size limit.
    #[instrument(skip(self), fields(version = %self.version, store = %self.store_name))]
    pub async fn install(&self) -> Result<(), CacheError> {
        let state = self.state();
        if state != LifecycleState::Parsed {
            return Err(CacheError::InvalidState {
                action: "install",
                state,
            });
        }
        self.set_state(LifecycleState::Installing);

        match self.stage_and_commit().await {
            Ok(count) => {
                self.set_state(LifecycleState::Installed);
                info!(entries = count, "Pre-cache installed");
                Ok(())
            }
            Err(e) => {
                self.set_state(LifecycleState::Redundant);
                error!(error = %e, "Pre-cache install failed");
                Err(e)
            }
        }
    }

    async fn stage_and_commit(&self) -> Result<usize, CacheError> {
        let urls = self.manifest.resolve(&self.scope.origin)?;

        let fetches = urls.into_iter().map(|url| {
            let network = Arc::clone(&self.network);
            async move {
                let response = network
                    .fetch(CacheRequest::get(url.clone()))
                    .await
                    .map_err(|source| CacheError::PrecacheFetch {
                        url: url.to_string(),
                        source,
                    })?;
                if !response.status.is_success() {
                    return Err(CacheError::PrecacheStatus {
                        url: url.to_string(),
                        status: response.status,
                    });
                }
                Ok((cache_key(&url), response))
            }
        });
        let staged = try_join_all(fetches).await?;
        let count = staged.len();

        let store = self.storage.create_detached(&self.store_name);
        store.pin_all(staged)?;
        self.storage.commit(store);
        Ok(count)
    }

    /// Delete every other store and start serving.
    ///
    /// Returns the names of the deleted stores.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidState`] unless the generation is
    /// installed.
    #[instrument(skip(self), fields(version = %self.version))]
    pub fn activate(&self) -> Result<Vec<String>, CacheError> {
        let state = self.state();
        if state != LifecycleState::Installed {
            return Err(CacheError::InvalidState {
                action: "activate",
                state,
            });
        }
        self.set_state(LifecycleState::Activating);

        let deleted: Vec<String> = self
            .storage
            .keys()
            .into_iter()
            .filter(|name| name != &self.store_name)
            .filter(|name| self.storage.delete(name))
            .collect();

        self.set_state(LifecycleState::Activated);
        info!(deleted = ?deleted, "Generation activated");
        Ok(deleted)
    }

    /// Whether `request` goes through the cache at all.
    #[must_use]
    pub fn intercepts(&self, request: &CacheRequest) -> bool {
        request.method == axum::http::Method::GET
            && same_origin(&request.url, &self.scope.origin)
            && !self.scope.is_admin_path(request.url.path())
    }

    /// Answer a request, stale-while-revalidate.
    ///
    /// The network fetch is spawned before the store lookup and always runs
    /// to completion, refreshing the store even when a cached copy was
    /// already returned.
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    pub async fn handle(&self, request: CacheRequest) -> FetchOutcome {
        if !self.intercepts(&request) {
            return match self.network.fetch(request).await {
                Ok(response) => FetchOutcome::Bypass(response),
                Err(e) => FetchOutcome::Failed(e),
            };
        }

        let key = request.cache_key();
        let accepts_html = request.accepts_html();
        let store = self.storage.get(&self.store_name).ok();

        let refresh = self.spawn_refresh(request, key.clone(), store.clone());

        if let Some(store) = &store
            && let Some(hit) = store.lookup(&key).await
        {
            debug!("Serving from cache");
            return FetchOutcome::Hit(hit);
        }

        let result = refresh
            .await
            .unwrap_or_else(|e| Err(FetchError::Aborted(e.to_string())));
        match result {
            Ok(response) => FetchOutcome::Network(response),
            Err(e) => {
                if accepts_html && let Some(page) = self.offline_page(store.as_ref()).await {
                    debug!(error = %e, "Serving offline fallback");
                    return FetchOutcome::Offline(page);
                }
                debug!(error = %e, "Network failed with nothing cached");
                FetchOutcome::Failed(e)
            }
        }
    }

    fn spawn_refresh(
        &self,
        request: CacheRequest,
        key: String,
        store: Option<ResponseCache>,
    ) -> JoinHandle<Result<CachedResponse, FetchError>> {
        let network = Arc::clone(&self.network);
        let origin = self.scope.origin.clone();
        tokio::spawn(async move {
            let result = network.fetch(request).await;
            if let Ok(response) = &result
                && response.status.is_success()
                && same_origin(&response.url, &origin)
                && let Some(store) = store
            {
                if let Err(e) = store.put(key, response.clone()).await {
                    warn!(error = %e, "Cache write failed");
                } else {
                    debug!(url = %response.url, "Cache refreshed");
                }
            }
            result
        })
    }

    async fn offline_page(&self, store: Option<&ResponseCache>) -> Option<CachedResponse> {
        let store = store?;
        let url = self
            .scope
            .origin
            .join(self.manifest.offline_page())
            .ok()?;
        store.lookup(&cache_key(&url)).await
    }
}

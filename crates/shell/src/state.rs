//! Application state shared across handlers.

use std::sync::Arc;

use site_shell_core::CartUpdated;

use crate::cache::{
    CacheController, CacheLimits, CacheStorage, Fetcher, ManifestError, PrecacheManifest, Scope,
};
use crate::cart::{BadgeRenderer, CartStore, DrawerRenderer};
use crate::config::ShellConfig;
use crate::events::EventBus;
use crate::storage::KeyValueStore;

/// The cart store as held by the application.
pub type SharedCart = CartStore<Arc<dyn KeyValueStore>>;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ShellConfig,
    events: Arc<EventBus<CartUpdated>>,
    cart: SharedCart,
    badge: BadgeRenderer,
    drawer: DrawerRenderer,
    cache: CacheController,
}

impl AppState {
    /// Create a new application state.
    ///
    /// The cart is loaded from `storage` immediately and both renderers are
    /// attached to it. No cache generation is registered yet.
    #[must_use]
    pub fn new(
        config: ShellConfig,
        storage: Arc<dyn KeyValueStore>,
        network: Arc<dyn Fetcher>,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let cart = CartStore::new(storage, Arc::clone(&events));

        let initial = cart.snapshot();
        let badge = BadgeRenderer::attach(&events, &initial);
        let drawer = DrawerRenderer::attach(&events, &initial);

        let cache_storage = CacheStorage::new(CacheLimits {
            max_entries: config.cache.max_entries,
            max_entry_bytes: config.cache.max_entry_bytes,
        });
        let scope = Scope {
            origin: config.base_url.clone(),
            admin_path: config.cache.admin_path.clone(),
            store_prefix: config.cache.store_prefix.clone(),
        };
        let cache = CacheController::new(
            cache_storage,
            network,
            scope,
            config.cache.immediate_takeover,
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                events,
                cart,
                badge,
                drawer,
                cache,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ShellConfig {
        &self.inner.config
    }

    /// Cart change notifications.
    #[must_use]
    pub fn events(&self) -> &EventBus<CartUpdated> {
        &self.inner.events
    }

    #[must_use]
    pub fn cart(&self) -> &SharedCart {
        &self.inner.cart
    }

    #[must_use]
    pub fn badge(&self) -> &BadgeRenderer {
        &self.inner.badge
    }

    #[must_use]
    pub fn drawer(&self) -> &DrawerRenderer {
        &self.inner.drawer
    }

    #[must_use]
    pub fn cache(&self) -> &CacheController {
        &self.inner.cache
    }

    /// Read the configured pre-cache manifest, applying any version
    /// override.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be read or is invalid.
    pub fn load_manifest(&self) -> Result<PrecacheManifest, ManifestError> {
        let settings = &self.inner.config.cache;
        let manifest = PrecacheManifest::load(&settings.manifest_path)?;
        Ok(match &settings.version_override {
            Some(version) => manifest.with_version(version.clone()),
            None => manifest,
        })
    }
}

//! Named response stores.
//!
//! Each store holds one generation of cached responses. Entries installed
//! from the pre-cache manifest are pinned and never evicted; entries added
//! while serving live in a bounded `moka` cache and are evicted once the
//! store holds `max_entries` of them. Stores are created detached, filled,
//! and only then committed under their name, so a store is never visible
//! half-populated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use moka::future::Cache;
use tracing::{debug, info};

use super::{CacheError, CachedResponse};

/// Size limits applied to every store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Maximum runtime entries per store. Pinned entries do not count.
    pub max_entries: u64,
    /// Largest body that will be stored.
    pub max_entry_bytes: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_entry_bytes: 5 * 1024 * 1024,
        }
    }
}

type Pinned = Arc<RwLock<HashMap<String, CachedResponse>>>;

/// One named store of responses keyed by URL.
///
/// Cheap to clone; clones share entries.
#[derive(Clone)]
pub struct ResponseCache {
    name: Arc<str>,
    pinned: Pinned,
    runtime: Cache<String, CachedResponse>,
    deleted: Arc<AtomicBool>,
    max_entry_bytes: usize,
}

impl ResponseCache {
    fn new(name: &str, limits: CacheLimits) -> Self {
        Self {
            name: Arc::from(name),
            pinned: Arc::new(RwLock::new(HashMap::new())),
            runtime: Cache::builder().max_capacity(limits.max_entries).build(),
            deleted: Arc::new(AtomicBool::new(false)),
            max_entry_bytes: limits.max_entry_bytes,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up the response stored for `key`.
    pub async fn lookup(&self, key: &str) -> Option<CachedResponse> {
        if self.is_deleted() {
            return None;
        }
        if let Some(hit) = self.pinned_entry(key) {
            return Some(hit);
        }
        self.runtime.get(key).await
    }

    /// Store `response` under `key`, replacing any previous entry.
    ///
    /// A pinned entry stays pinned when it is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the body exceeds the entry limit or the store
    /// has been deleted.
    pub async fn put(&self, key: String, response: CachedResponse) -> Result<(), CacheError> {
        self.check_writable(&key, &response)?;
        {
            let mut pinned = self.pinned.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = pinned.get_mut(&key) {
                *entry = response;
                return Ok(());
            }
        }
        self.runtime.insert(key, response).await;
        Ok(())
    }

    /// Pin every entry, or none if any of them is rejected.
    ///
    /// # Errors
    ///
    /// Returns the first rejection; nothing is written in that case.
    pub fn pin_all(&self, entries: Vec<(String, CachedResponse)>) -> Result<(), CacheError> {
        for (key, response) in &entries {
            self.check_writable(key, response)?;
        }
        self.pinned
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(entries);
        Ok(())
    }

    /// Whether an entry exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        !self.is_deleted()
            && (self
                .pinned
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(key)
                || self.runtime.contains_key(key))
    }

    /// Keys of all stored entries, sorted.
    pub async fn keys(&self) -> Vec<String> {
        self.runtime.run_pending_tasks().await;
        let mut keys: Vec<String> = self
            .pinned
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.extend(self.runtime.iter().map(|(k, _)| (*k).clone()));
        keys.sort();
        keys.dedup();
        keys
    }

    /// Number of stored entries.
    pub async fn len(&self) -> u64 {
        self.runtime.run_pending_tasks().await;
        let pinned = self.pinned.read().unwrap_or_else(PoisonError::into_inner).len();
        u64::try_from(pinned).unwrap_or(u64::MAX) + self.runtime.entry_count()
    }

    fn pinned_entry(&self, key: &str) -> Option<CachedResponse> {
        self.pinned
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    fn discard(&self) {
        self.deleted.store(true, Ordering::SeqCst);
        self.pinned
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.runtime.invalidate_all();
    }

    fn check_writable(&self, key: &str, response: &CachedResponse) -> Result<(), CacheError> {
        if self.is_deleted() {
            return Err(CacheError::StoreDeleted(self.name.to_string()));
        }
        if response.size() > self.max_entry_bytes {
            return Err(CacheError::EntryTooLarge {
                url: key.to_string(),
                size: response.size(),
                limit: self.max_entry_bytes,
            });
        }
        Ok(())
    }
}

/// The set of all named stores.
#[derive(Clone, Default)]
pub struct CacheStorage {
    stores: Arc<RwLock<HashMap<String, ResponseCache>>>,
    limits: CacheLimits,
}

impl CacheStorage {
    #[must_use]
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            stores: Arc::new(RwLock::new(HashMap::new())),
            limits,
        }
    }

    /// Open the store called `name`, creating it empty if it does not exist.
    #[must_use]
    pub fn open(&self, name: &str) -> ResponseCache {
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        stores
            .entry(name.to_string())
            .or_insert_with(|| ResponseCache::new(name, self.limits))
            .clone()
    }

    /// Get an existing store.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::StoreNotFound`] if no store has that name.
    pub fn get(&self, name: &str) -> Result<ResponseCache, CacheError> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::StoreNotFound(name.to_string()))
    }

    /// A store that is not yet visible under its name.
    #[must_use]
    pub fn create_detached(&self, name: &str) -> ResponseCache {
        ResponseCache::new(name, self.limits)
    }

    /// Make a detached store visible, replacing any store with the same name.
    pub fn commit(&self, store: ResponseCache) {
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = stores.insert(store.name().to_string(), store) {
            previous.discard();
        }
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Names of all stores, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Drop a store and all its entries. Returns whether it existed.
    pub fn delete(&self, name: &str) -> bool {
        let removed = self
            .stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        match removed {
            Some(store) => {
                store.discard();
                info!(store = name, "Cache store deleted");
                true
            }
            None => {
                debug!(store = name, "No cache store to delete");
                false
            }
        }
    }
}

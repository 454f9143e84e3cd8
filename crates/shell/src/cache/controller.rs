//! Tracks which generation is serving and which is waiting to take over.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use site_shell_core::CacheVersion;
use tracing::{info, instrument, warn};

use super::{
    CacheError, CacheOrchestrator, CacheRequest, CacheStorage, FetchOutcome, Fetcher,
    LifecycleState, PrecacheManifest, Scope,
};

/// What [`CacheController::register`] did with a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterOutcome {
    /// Installed and now serving.
    Activated,
    /// Installed; waiting for [`CacheController::activate_waiting`].
    Waiting,
    /// That version is already active or waiting.
    Unchanged,
}

/// Summary of one generation.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationStatus {
    pub version: CacheVersion,
    pub store: String,
    pub state: LifecycleState,
    pub precached: usize,
}

impl From<&CacheOrchestrator> for GenerationStatus {
    fn from(orchestrator: &CacheOrchestrator) -> Self {
        Self {
            version: orchestrator.version().clone(),
            store: orchestrator.store_name().to_string(),
            state: orchestrator.state(),
            precached: orchestrator.manifest().urls().len(),
        }
    }
}

/// Snapshot returned by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub active: Option<GenerationStatus>,
    pub waiting: Option<GenerationStatus>,
    pub stores: Vec<String>,
}

type Slot = RwLock<Option<Arc<CacheOrchestrator>>>;

/// Owns the cache generations for one origin.
pub struct CacheController {
    storage: CacheStorage,
    network: Arc<dyn Fetcher>,
    scope: Scope,
    immediate_takeover: bool,
    active: Slot,
    waiting: Slot,
}

impl CacheController {
    #[must_use]
    pub fn new(
        storage: CacheStorage,
        network: Arc<dyn Fetcher>,
        scope: Scope,
        immediate_takeover: bool,
    ) -> Self {
        Self {
            storage,
            network,
            scope,
            immediate_takeover,
            active: RwLock::new(None),
            waiting: RwLock::new(None),
        }
    }

    /// Install a new generation from `manifest`.
    ///
    /// With immediate takeover the new generation is activated at once;
    /// otherwise it waits and the current one keeps serving. A failed
    /// install leaves everything as it was.
    ///
    /// # Errors
    ///
    /// Returns the install error.
    #[instrument(skip_all, fields(version = %manifest.version()))]
    pub async fn register(&self, manifest: PrecacheManifest) -> Result<RegisterOutcome, CacheError> {
        let version = manifest.version().clone();
        let already = |slot: &Slot| {
            read(slot).is_some_and(|g| g.version() == &version && g.state() != LifecycleState::Redundant)
        };
        if already(&self.active) || already(&self.waiting) {
            info!("Cache version already registered");
            return Ok(RegisterOutcome::Unchanged);
        }

        let generation = Arc::new(CacheOrchestrator::new(
            manifest,
            self.scope.clone(),
            self.storage.clone(),
            Arc::clone(&self.network),
        ));
        generation.install().await?;

        if self.immediate_takeover || read(&self.active).is_none() {
            self.promote(generation)?;
            return Ok(RegisterOutcome::Activated);
        }

        let previous = write(&self.waiting).replace(generation);
        if let Some(previous) = previous {
            previous.mark_redundant();
            self.storage.delete(previous.store_name());
        }
        info!("New cache generation waiting");
        Ok(RegisterOutcome::Waiting)
    }

    /// Activate the waiting generation, if there is one.
    ///
    /// Returns whether a generation was activated.
    ///
    /// # Errors
    ///
    /// Returns an error if the waiting generation is not installed.
    pub fn activate_waiting(&self) -> Result<bool, CacheError> {
        let Some(waiting) = write(&self.waiting).take() else {
            return Ok(false);
        };
        self.promote(waiting)?;
        Ok(true)
    }

    fn promote(&self, generation: Arc<CacheOrchestrator>) -> Result<(), CacheError> {
        generation.activate()?;
        let previous = write(&self.active).replace(generation);
        if let Some(previous) = previous {
            previous.mark_redundant();
        }
        // A waiting generation's store was deleted by activation.
        if let Some(stale) = write(&self.waiting).take() {
            warn!(version = %stale.version(), "Waiting generation superseded");
            stale.mark_redundant();
        }
        Ok(())
    }

    /// Route a request through the active generation, or straight to the
    /// network when none is active.
    pub async fn handle(&self, request: CacheRequest) -> FetchOutcome {
        let active = read(&self.active);
        match active {
            Some(generation) => generation.handle(request).await,
            None => match self.network.fetch(request).await {
                Ok(response) => FetchOutcome::Bypass(response),
                Err(e) => FetchOutcome::Failed(e),
            },
        }
    }

    /// The generation currently serving.
    #[must_use]
    pub fn active(&self) -> Option<Arc<CacheOrchestrator>> {
        read(&self.active)
    }

    #[must_use]
    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            active: read(&self.active).as_deref().map(GenerationStatus::from),
            waiting: read(&self.waiting).as_deref().map(GenerationStatus::from),
            stores: self.storage.keys(),
        }
    }

    #[must_use]
    pub const fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    #[must_use]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }
}

fn read(slot: &Slot) -> Option<Arc<CacheOrchestrator>> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write(slot: &Slot) -> std::sync::RwLockWriteGuard<'_, Option<Arc<CacheOrchestrator>>> {
    slot.write().unwrap_or_else(PoisonError::into_inner)
}

//! Cache administration endpoints under `/_shell`.
//!
//! `status` is read-only and open; `activate` and `install` require the
//! control token.

use axum::{Json, extract::State};
use serde::Serialize;
use tracing::{info, instrument};

use crate::cache::{ControllerStatus, RegisterOutcome};
use crate::error::Result;
use crate::middleware::RequireControlToken;
use crate::state::AppState;

/// Active and waiting generations plus every store name.
pub async fn status(State(state): State<AppState>) -> Json<ControllerStatus> {
    Json(state.cache().status())
}

/// Result of an activate or install call.
#[derive(Debug, Serialize)]
pub struct ShellActionResponse {
    pub outcome: &'static str,
    pub status: ControllerStatus,
}

/// Promote the waiting generation.
#[instrument(skip_all)]
pub async fn activate(
    _: RequireControlToken,
    State(state): State<AppState>,
) -> Result<Json<ShellActionResponse>> {
    let activated = state.cache().activate_waiting()?;
    let outcome = if activated { "activated" } else { "nothing_waiting" };
    info!(outcome, "Activate requested");
    Ok(Json(ShellActionResponse {
        outcome,
        status: state.cache().status(),
    }))
}

/// Re-read the manifest and install it as a new generation.
#[instrument(skip_all)]
pub async fn install(
    _: RequireControlToken,
    State(state): State<AppState>,
) -> Result<Json<ShellActionResponse>> {
    let manifest = state.load_manifest()?;
    let outcome = match state.cache().register(manifest).await? {
        RegisterOutcome::Activated => "activated",
        RegisterOutcome::Waiting => "waiting",
        RegisterOutcome::Unchanged => "unchanged",
    };
    info!(outcome, "Install requested");
    Ok(Json(ShellActionResponse {
        outcome,
        status: state.cache().status(),
    }))
}

//! Site shell library.
//!
//! An offline-first front for a static site: a stale-while-revalidate
//! response cache with versioned pre-caching, and a persisted shopping cart
//! whose changes are pushed to every rendered view.
//!
//! The binary wires these together; the library is exposed so the pieces
//! can be tested and driven from the CLI.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cache;
pub mod cart;
pub mod config;
pub mod error;
pub mod events;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod storage;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use state::AppState;

/// Build the full router, minus the Sentry layers added by the binary.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .merge(routes::routes())
        .layer(axum::middleware::from_fn(
            middleware::request_id_middleware,
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = tracing::field::Empty,
                )
            }),
        )
        .with_state(state)
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable until a cache generation is active.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.cache().active().is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

//! HTTP route handlers for the shell.
//!
//! # Route Structure
//!
//! ```text
//! # Cart (HTMX fragments, JSON accepted too)
//! GET  /cart                   - Cart state as JSON
//! POST /cart/add               - Add one unit (returns count badge, triggers cartUpdated)
//! POST /cart/update            - Set quantity (returns cart_items fragment)
//! POST /cart/remove            - Remove item (returns cart_items fragment)
//! POST /cart/clear             - Empty cart (returns cart_items fragment)
//! GET  /cart/count             - Cart count badge (fragment)
//! GET  /cart/drawer            - Cart items (fragment)
//! GET  /cart/events            - cartUpdated server-sent events
//!
//! # Offline cache
//! GET  /_shell/status          - Generations and stores
//! POST /_shell/activate        - Promote the waiting generation (bearer token)
//! POST /_shell/install         - Re-read the manifest and install it (bearer token)
//!
//! # Everything else
//! *                            - Intercepted (stale-while-revalidate)
//! ```

pub mod cart;
pub mod proxy;
pub mod shell;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/add", post(cart::add))
        .route("/update", post(cart::update))
        .route("/remove", post(cart::remove))
        .route("/clear", post(cart::clear))
        .route("/count", get(cart::count))
        .route("/drawer", get(cart::drawer))
        .route("/events", get(cart::events))
}

/// Create the cache administration router.
pub fn shell_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(shell::status))
        .route("/activate", post(shell::activate))
        .route("/install", post(shell::install))
}

/// Create all routes for the shell.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/cart", cart_routes())
        .nest("/_shell", shell_routes())
        .fallback(proxy::intercept)
}

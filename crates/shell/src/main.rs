//! Site shell - offline-first front for a static site.
//!
//! This binary serves the shell on port 3000 by default.
//!
//! # Architecture
//!
//! - Axum web framework with HTMX fragments for the cart views
//! - Askama templates for the badge and drawer fragments
//! - `reqwest` for upstream fetches, `moka` for the response stores
//! - Cart persisted as JSON files under the data directory
//!
//! On startup the pre-cache manifest is installed. If that fails the shell
//! still serves, passing every request straight upstream, and reports
//! not-ready until `POST /_shell/install` (bearer `SHELL_CONTROL_TOKEN`)
//! succeeds.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use sentry::integrations::tracing as sentry_tracing;
use site_shell::cache::UpstreamFetcher;
use site_shell::config::{LogFormat, ShellConfig};
use site_shell::state::AppState;
use site_shell::storage::FileStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &ShellConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR => sentry_tracing::EventFilter::Event,
        tracing::Level::WARN | tracing::Level::INFO => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "site_shell=info,tower_http=info".into());

    let json = (format == LogFormat::Json).then(|| tracing_subscriber::fmt::layer().json());
    let text = (format == LogFormat::Text).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json)
        .with(text)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = ShellConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);
    init_tracing(config.log_format);

    let storage = FileStore::open(&config.data_dir).expect("Failed to open data directory");
    tracing::info!(dir = %config.data_dir.display(), "Cart storage opened");

    let network = UpstreamFetcher::new(
        config.base_url.clone(),
        config.upstream_url.clone(),
        config.upstream_timeout,
    )
    .expect("Failed to build upstream client");

    let state = AppState::new(config.clone(), Arc::new(storage), Arc::new(network));
    tracing::info!(
        items = state.cart().total_item_count(),
        "Cart loaded"
    );

    match state.load_manifest() {
        Ok(manifest) => match state.cache().register(manifest).await {
            Ok(outcome) => tracing::info!(?outcome, "Pre-cache manifest registered"),
            Err(e) => tracing::error!(error = %e, "Pre-cache install failed, serving uncached"),
        },
        Err(e) => tracing::error!(error = %e, "Pre-cache manifest unusable, serving uncached"),
    }

    let app = site_shell::app(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    if config.control_token.is_none() {
        tracing::warn!("SHELL_CONTROL_TOKEN not set; POST /_shell/install and /activate are disabled");
    }

    let addr = config.socket_addr();
    tracing::info!(%addr, upstream = %config.upstream_url, "site-shell listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

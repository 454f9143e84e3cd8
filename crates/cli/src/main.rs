//! Site shell CLI - manifest checks and cart inspection.
//!
//! # Usage
//!
//! ```bash
//! # Validate the pre-cache manifest
//! shell-cli manifest check --manifest precache.json
//!
//! # Dry-run an install against the upstream site
//! shell-cli manifest verify --upstream http://127.0.0.1:8080
//!
//! # Show or clear the persisted cart
//! shell-cli cart show --data-dir ./data
//! shell-cli cart clear --data-dir ./data
//! ```
//!
//! # Commands
//!
//! - `manifest check` - Parse and validate a manifest
//! - `manifest verify` - Fetch every manifest URL from the upstream
//! - `cart show` - Print the persisted cart
//! - `cart clear` - Empty the persisted cart

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use url::Url;

mod commands;

#[derive(Parser)]
#[command(name = "shell-cli")]
#[command(author, version, about = "Site shell CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the pre-cache manifest
    Manifest {
        #[command(subcommand)]
        action: ManifestAction,
    },
    /// Inspect the persisted cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
}

#[derive(Subcommand)]
enum ManifestAction {
    /// Parse and validate the manifest
    Check {
        /// Manifest file
        #[arg(short, long, env = "SHELL_PRECACHE_MANIFEST", default_value = "precache.json")]
        manifest: PathBuf,

        /// Store name prefix
        #[arg(short, long, env = "SHELL_CACHE_PREFIX", default_value = "site-cache")]
        prefix: String,
    },
    /// Fetch every manifest URL from the upstream without storing anything
    Verify {
        /// Manifest file
        #[arg(short, long, env = "SHELL_PRECACHE_MANIFEST", default_value = "precache.json")]
        manifest: PathBuf,

        /// Upstream origin serving the site
        #[arg(short, long, env = "SHELL_UPSTREAM_URL")]
        upstream: Url,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Print items, count and subtotal
    Show {
        /// Cart storage directory
        #[arg(short, long, env = "SHELL_DATA_DIR", default_value = "data")]
        data_dir: PathBuf,
    },
    /// Remove every item
    Clear {
        /// Cart storage directory
        #[arg(short, long, env = "SHELL_DATA_DIR", default_value = "data")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Manifest { action } => match action {
            ManifestAction::Check { manifest, prefix } => {
                commands::manifest::check(&manifest, &prefix)?;
            }
            ManifestAction::Verify {
                manifest,
                upstream,
                timeout,
            } => commands::manifest::verify(&manifest, upstream, timeout).await?,
        },
        Commands::Cart { action } => match action {
            CartAction::Show { data_dir } => commands::cart::show(&data_dir)?,
            CartAction::Clear { data_dir } => commands::cart::clear(&data_dir)?,
        },
    }
    Ok(())
}

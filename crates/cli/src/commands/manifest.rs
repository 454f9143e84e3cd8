//! Pre-cache manifest commands.
//!
//! `check` only parses and validates. `verify` performs the fetch half of an
//! install against the upstream and reports every URL that would make the
//! install fail, instead of stopping at the first one.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use site_shell::cache::{CacheRequest, Fetcher, PrecacheManifest, UpstreamFetcher};
use thiserror::Error;
use tracing::info;
use url::Url;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("{failed} of {total} manifest URLs failed")]
    Failed { failed: usize, total: usize },
}

/// Parse and validate a manifest, then print what it would install.
///
/// # Errors
///
/// Returns an error if the manifest cannot be read or is invalid.
pub fn check(path: &Path, prefix: &str) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = PrecacheManifest::load(path)?;

    #[allow(clippy::print_stdout)]
    {
        println!("version:      {}", manifest.version());
        println!("store:        {}", manifest.store_name(prefix));
        println!("offline page: {}", manifest.offline_page());
        println!("urls ({}):", manifest.urls().len());
        for url in manifest.urls() {
            println!("  {url}");
        }
    }
    Ok(())
}

/// Fetch every manifest URL from `upstream` and report failures.
///
/// # Errors
///
/// Returns an error if the manifest is invalid or any URL fails.
pub async fn verify(
    path: &Path,
    upstream: Url,
    timeout_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = PrecacheManifest::load(path)?;
    let urls = manifest.resolve(&upstream)?;
    let network: Arc<dyn Fetcher> = Arc::new(UpstreamFetcher::new(
        upstream.clone(),
        upstream,
        Duration::from_secs(timeout_secs),
    )?);

    info!(count = urls.len(), "Verifying manifest URLs");
    let results = join_all(urls.into_iter().map(|url| {
        let network = Arc::clone(&network);
        async move {
            let outcome = network.fetch(CacheRequest::get(url.clone())).await;
            (url, outcome)
        }
    }))
    .await;

    let total = results.len();
    let mut failed = 0;
    #[allow(clippy::print_stdout)]
    {
        for (url, outcome) in results {
            match outcome {
                Ok(response) if response.status.is_success() => {
                    println!(
                        "ok    {} {url} ({} bytes)",
                        response.status.as_u16(),
                        response.size()
                    );
                }
                Ok(response) => {
                    failed += 1;
                    println!("FAIL  {} {url}", response.status.as_u16());
                }
                Err(e) => {
                    failed += 1;
                    println!("FAIL  --- {url}: {e}");
                }
            }
        }
    }

    if failed > 0 {
        return Err(VerifyError::Failed { failed, total }.into());
    }
    info!(total, "All manifest URLs fetched");
    Ok(())
}

//! The pre-cache manifest: which URLs a generation installs.
//!
//! ```json
//! {
//!   "version": "v1",
//!   "offlinePage": "/offline.html",
//!   "urls": ["/", "/index.html", "/css/app.css"]
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use site_shell_core::CacheVersion;
use thiserror::Error;
use url::Url;

/// Errors loading or validating a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Manifest URL must be site-relative (start with '/'): {0}")]
    NotSiteRelative(String),

    #[error("Manifest lists no URLs")]
    Empty,

    #[error("Manifest URL {url} cannot be resolved: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    version: CacheVersion,
    #[serde(default = "default_offline_page")]
    offline_page: String,
    urls: Vec<String>,
}

fn default_offline_page() -> String {
    "/offline.html".to_string()
}

/// A validated pre-cache manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheManifest {
    version: CacheVersion,
    offline_page: String,
    urls: Vec<String>,
}

impl PrecacheManifest {
    /// Build a manifest.
    ///
    /// Duplicate URLs are dropped keeping first occurrence, and the offline
    /// page is added if it is not listed.
    ///
    /// # Errors
    ///
    /// Returns an error if `urls` is empty or any path is not site-relative.
    pub fn new(
        version: CacheVersion,
        offline_page: impl Into<String>,
        urls: Vec<String>,
    ) -> Result<Self, ManifestError> {
        let offline_page = offline_page.into();
        if urls.is_empty() {
            return Err(ManifestError::Empty);
        }

        let mut unique: Vec<String> = Vec::with_capacity(urls.len() + 1);
        for url in urls.into_iter().chain(std::iter::once(offline_page.clone())) {
            check_site_relative(&url)?;
            if !unique.contains(&url) {
                unique.push(url);
            }
        }

        Ok(Self {
            version,
            offline_page,
            urls: unique,
        })
    }

    /// Parse a manifest from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or fails validation.
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_str(json)?;
        Self::new(raw.version, raw.offline_page, raw.urls)
    }

    /// Read and parse a manifest file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let json = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Replace the version, e.g. from configuration.
    #[must_use]
    pub fn with_version(mut self, version: CacheVersion) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub const fn version(&self) -> &CacheVersion {
        &self.version
    }

    /// Path of the offline fallback document.
    #[must_use]
    pub fn offline_page(&self) -> &str {
        &self.offline_page
    }

    /// Site-relative URLs to install, offline page included.
    #[must_use]
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Name of the store this manifest installs into.
    #[must_use]
    pub fn store_name(&self, prefix: &str) -> String {
        self.version.store_name(prefix)
    }

    /// Absolute URLs on `origin`.
    ///
    /// # Errors
    ///
    /// Returns an error if a path cannot be joined onto `origin`.
    pub fn resolve(&self, origin: &Url) -> Result<Vec<Url>, ManifestError> {
        self.urls
            .iter()
            .map(|path| {
                origin.join(path).map_err(|e| ManifestError::InvalidUrl {
                    url: path.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

fn check_site_relative(url: &str) -> Result<(), ManifestError> {
    // "//host/x" is protocol-relative, not site-relative.
    if url.starts_with('/') && !url.starts_with("//") {
        Ok(())
    } else {
        Err(ManifestError::NotSiteRelative(url.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json() {
        let manifest = PrecacheManifest::from_json(
            r#"{"version":"v3","offlinePage":"/offline.html","urls":["/","/app.css","/"]}"#,
        )
        .unwrap();

        assert_eq!(manifest.version().as_str(), "v3");
        assert_eq!(manifest.urls(), ["/", "/app.css", "/offline.html"]);
        assert_eq!(manifest.store_name("site-cache"), "site-cache-v3");
    }

    #[test]
    fn test_offline_page_defaults() {
        let manifest = PrecacheManifest::from_json(r#"{"version":"v1","urls":["/"]}"#).unwrap();
        assert_eq!(manifest.offline_page(), "/offline.html");
        assert_eq!(manifest.urls().len(), 2);
    }

    #[test]
    fn test_rejects_absolute_and_protocol_relative() {
        for bad in ["https://cdn.test/x.js", "//cdn.test/x.js", "app.css"] {
            let json = format!(r#"{{"version":"v1","urls":["{bad}"]}}"#);
            assert!(matches!(
                PrecacheManifest::from_json(&json),
                Err(ManifestError::NotSiteRelative(_))
            ));
        }
    }

    #[test]
    fn test_rejects_empty_and_bad_version() {
        assert!(matches!(
            PrecacheManifest::from_json(r#"{"version":"v1","urls":[]}"#),
            Err(ManifestError::Empty)
        ));
        assert!(matches!(
            PrecacheManifest::from_json(r#"{"version":"v 1","urls":["/"]}"#),
            Err(ManifestError::Parse(_))
        ));
    }

    #[test]
    fn test_resolve_and_with_version() {
        let manifest = PrecacheManifest::from_json(r#"{"version":"v1","urls":["/a?x=1"]}"#)
            .unwrap()
            .with_version("v9".parse().unwrap());
        let urls = manifest
            .resolve(&Url::parse("https://site.test").unwrap())
            .unwrap();

        assert_eq!(urls[0].as_str(), "https://site.test/a?x=1");
        assert_eq!(manifest.version().as_str(), "v9");
    }

    #[test]
    fn test_load_missing_file() {
        let err = PrecacheManifest::load(Path::new("/nonexistent/precache.json")).unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
    }
}

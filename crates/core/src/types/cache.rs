//! Cache version identifiers.
//!
//! A version is embedded in the name of the store that holds one generation
//! of cached responses. Bumping it is the only way to invalidate everything
//! cached before.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when parsing a [`CacheVersion`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheVersionError {
    #[error("cache version must not be empty")]
    Empty,
    #[error("cache version contains invalid character {0:?}")]
    InvalidChar(char),
}

/// A validated cache version such as `v3` or `2026.10.17-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheVersion(String);

impl CacheVersion {
    /// Parse and validate a version identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is empty or contains characters other
    /// than ASCII alphanumerics, `.`, `-` and `_`.
    pub fn parse(value: &str) -> Result<Self, CacheVersionError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(CacheVersionError::Empty);
        }
        if let Some(c) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
        {
            return Err(CacheVersionError::InvalidChar(c));
        }
        Ok(Self(value.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name of the store holding this version's entries.
    #[must_use]
    pub fn store_name(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.0)
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CacheVersion {
    type Err = CacheVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CacheVersion {
    type Error = CacheVersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CacheVersion> for String {
    fn from(version: CacheVersion) -> Self {
        version.0
    }
}

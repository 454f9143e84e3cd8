//! Durable key-value storage behind a minimal interface.
//!
//! The cart store only ever needs `get` and `set` on a single key, so the
//! storage engine (in-memory, file-based, or anything else) can be swapped
//! without touching cart logic.
//!
//! # Implementations
//!
//! - [`MemoryStore`] - Process-local map, used in tests and ephemeral setups
//! - [`FileStore`] - One JSON file per key under a data directory

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use thiserror::Error;

/// Errors that can occur when reading or writing storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The key contains characters the engine cannot store.
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// Storage refused the write (disabled, full, read-only).
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Minimal synchronous key-value persistence.
///
/// Values are opaque strings; callers own the serialization format.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage engine cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write did not happen.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete the value stored under `key`. Missing keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage engine cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}

/// Keys are restricted so that every engine can use them as file names.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

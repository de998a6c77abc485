//! Storage backend trait definition.

use crate::error::StorageResult;
use async_trait::async_trait;

/// An asynchronous, string-keyed persistence backend for ShelfDB.
///
/// Backends are **opaque string stores**. ShelfDB decides which keys exist
/// and what their values mean; a backend only has to remember them.
///
/// # Invariants
///
/// - `get` returns exactly the value most recently passed to `set` for that
///   key, or `None` if the key was never set or has been removed
/// - `remove` of an absent key is not an error
/// - Calls may suspend; callers must not assume any call completes
///   synchronously
/// - No atomicity is promised across separate calls
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be written.
    async fn set(&self, key: &str, value: String) -> StorageResult<()>;

    /// Removes the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal fails for a reason other than the key
    /// being absent.
    async fn remove(&self, key: &str) -> StorageResult<()>;
}

//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// An in-memory storage backend.
///
/// This backend stores all entries in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral databases that don't need persistence
///
/// By default every call completes without suspending. A backend built with
/// [`InMemoryBackend::yielding`] yields to the runtime once per call, which
/// behaves like a genuinely asynchronous store and exercises the engine's
/// suspension points.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use shelfdb_storage::{InMemoryBackend, StorageBackend};
///
/// async fn demo() {
///     let backend = InMemoryBackend::new();
///     backend.set("a", "1".into()).await.unwrap();
///     assert_eq!(backend.len(), 1);
/// }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<BTreeMap<String, String>>,
    yielding: bool,
    writes: AtomicU64,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that yields to the async runtime on every call.
    #[must_use]
    pub fn yielding() -> Self {
        Self {
            yielding: true,
            ..Self::default()
        }
    }

    /// Creates a new in-memory backend with pre-existing entries.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_entries(entries: BTreeMap<String, String>) -> Self {
        Self {
            entries: RwLock::new(entries),
            ..Self::default()
        }
    }

    /// Returns a copy of all entries in the backend.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.read().clone()
    }

    /// Returns all keys currently stored, in ascending order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns how many `set` and `remove` calls have been served.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Clears all entries from the backend.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    async fn maybe_yield(&self) {
        if self.yielding {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.maybe_yield().await;
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> StorageResult<()> {
        self.maybe_yield().await;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.maybe_yield().await;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty());
        assert_eq!(backend.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_set_then_get() {
        let backend = InMemoryBackend::new();
        backend.set("k", "v".to_string()).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn memory_set_overwrites() {
        let backend = InMemoryBackend::new();
        backend.set("k", "one".to_string()).await.unwrap();
        backend.set("k", "two".to_string()).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("two"));
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn memory_remove_absent_is_ok() {
        let backend = InMemoryBackend::new();
        backend.remove("nothing").await.unwrap();
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn memory_remove_deletes() {
        let backend = InMemoryBackend::new();
        backend.set("k", "v".to_string()).await.unwrap();
        backend.remove("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_counts_writes() {
        let backend = InMemoryBackend::new();
        backend.set("a", "1".to_string()).await.unwrap();
        backend.set("b", "2".to_string()).await.unwrap();
        backend.remove("a").await.unwrap();
        let _ = backend.get("b").await.unwrap();
        assert_eq!(backend.write_count(), 3);
    }

    #[tokio::test]
    async fn memory_keys_are_sorted() {
        let backend = InMemoryBackend::new();
        backend.set("b", String::new()).await.unwrap();
        backend.set("a", String::new()).await.unwrap();
        assert_eq!(backend.keys(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn memory_with_entries() {
        let mut entries = BTreeMap::new();
        entries.insert("preloaded".to_string(), "yes".to_string());
        let backend = InMemoryBackend::with_entries(entries);
        assert_eq!(backend.get("preloaded").await.unwrap().as_deref(), Some("yes"));
    }

    #[tokio::test]
    async fn yielding_backend_behaves_the_same() {
        let backend = InMemoryBackend::yielding();
        backend.set("k", "v".to_string()).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));
        backend.clear();
        assert!(backend.is_empty());
    }
}

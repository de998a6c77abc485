//! Test fixtures and database helpers.
//!
//! Provides factories over throwaway backends and shortcuts for the
//! open/upgrade/read boilerplate most tests share.

use shelfdb_codec::Value;
use shelfdb_core::{
    Connection, Factory, Key, ObjectStoreOptions, Query, TransactionMode,
};
use shelfdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::sync::Arc;
use tempfile::TempDir;

/// A factory over a throwaway backend.
pub struct TestFactory {
    /// The factory instance.
    pub factory: Factory,
    backend: Arc<dyn StorageBackend>,
    memory: Option<Arc<InMemoryBackend>>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestFactory {
    /// Creates a factory over a fresh in-memory backend.
    pub fn memory() -> Self {
        Self::over_memory(InMemoryBackend::new())
    }

    /// Creates a factory over an in-memory backend that suspends on every
    /// call.
    pub fn yielding() -> Self {
        Self::over_memory(InMemoryBackend::yielding())
    }

    fn over_memory(backend: InMemoryBackend) -> Self {
        let memory = Arc::new(backend);
        let backend: Arc<dyn StorageBackend> = memory.clone();
        Self {
            factory: Factory::new(Arc::clone(&backend)),
            backend,
            memory: Some(memory),
            _temp_dir: None,
        }
    }

    /// Creates a factory over a file backend in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let backend: Arc<dyn StorageBackend> = Arc::new(
            FileBackend::open(temp_dir.path()).expect("Failed to open file backend"),
        );
        Self {
            factory: Factory::new(Arc::clone(&backend)),
            backend,
            memory: None,
            _temp_dir: Some(temp_dir),
        }
    }

    /// A second, independent factory over the same backend, as a restarted
    /// process would see it.
    pub fn reopen(&self) -> Factory {
        Factory::new(Arc::clone(&self.backend))
    }

    /// Every backend key, sorted. `None` for file-backed fixtures.
    pub fn backend_keys(&self) -> Option<Vec<String>> {
        self.memory.as_ref().map(|memory| memory.keys())
    }
}

impl std::ops::Deref for TestFactory {
    type Target = Factory;

    fn deref(&self) -> &Self::Target {
        &self.factory
    }
}

/// Opens `name` at version 1, creating the given stores in the upgrade.
pub async fn open_with_stores(
    factory: &Factory,
    name: &str,
    stores: &[(&str, ObjectStoreOptions)],
) -> Connection {
    let stores: Vec<(String, ObjectStoreOptions)> = stores
        .iter()
        .map(|(name, options)| ((*name).to_string(), options.clone()))
        .collect();
    factory
        .open(name, Some(1), |upgrade| async move {
            for (name, options) in stores {
                upgrade.transaction.create_object_store(&name, options)?;
            }
            Ok(())
        })
        .await
        .expect("Failed to open database")
}

/// Puts every `(key, value)` pair in one read-write transaction and waits
/// for it to commit. Returns the effective keys.
pub async fn put_all(connection: &Connection, store: &str, records: Vec<(Option<Key>, Value)>) -> Vec<Key> {
    let txn = connection
        .transaction(&[store], TransactionMode::ReadWrite)
        .expect("Failed to start transaction");
    let handle = txn.object_store(store).expect("Failed to open store");
    let requests: Vec<_> = records
        .into_iter()
        .map(|(key, value)| handle.put(value, key).expect("Failed to queue put"))
        .collect();
    let mut keys = Vec::with_capacity(requests.len());
    for request in requests {
        keys.push(request.await.expect("Put failed"));
    }
    assert!(txn.done().await.is_committed(), "Transaction should commit");
    keys
}

/// Reads every record of a store, in key order.
pub async fn read_all(connection: &Connection, store: &str) -> Vec<(Key, Value)> {
    let txn = connection
        .transaction(&[store], TransactionMode::ReadOnly)
        .expect("Failed to start transaction");
    let handle = txn.object_store(store).expect("Failed to open store");
    let keys = handle.get_all_keys(Query::All, None).expect("Failed to queue read");
    let values = handle.get_all(Query::All, None).expect("Failed to queue read");
    let keys = keys.await.expect("Read failed");
    let values = values.await.expect("Read failed");
    keys.into_iter().zip(values).collect()
}

/// Shorthand for an object value.
pub fn object<'a>(fields: impl IntoIterator<Item = (&'a str, Value)>) -> Value {
    Value::object(fields)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Opens `name` with one out-of-line store `"items"` holding keys
    /// `1..=count`, each value `{n: key}`.
    pub async fn populated_store(factory: &Factory, name: &str, count: u32) -> Connection {
        let connection = open_with_stores(factory, name, &[("items", ObjectStoreOptions::default())]).await;
        let records = (1..=count)
            .map(|n| (Some(Key::from(n)), object([("n", Value::from(n))])))
            .collect();
        put_all(&connection, "items", records).await;
        connection
    }

    /// Opens `name` with one store per name in `stores`, each holding a
    /// single record at key 1.
    pub async fn multi_store_database(factory: &Factory, name: &str, stores: &[&str]) -> Connection {
        let options: Vec<(&str, ObjectStoreOptions)> = stores
            .iter()
            .map(|store| (*store, ObjectStoreOptions::default()))
            .collect();
        let connection = open_with_stores(factory, name, &options).await;
        for store in stores {
            put_all(
                &connection,
                store,
                vec![(Some(Key::from(1)), object([("store", Value::from(*store))]))],
            )
            .await;
        }
        connection
    }
}

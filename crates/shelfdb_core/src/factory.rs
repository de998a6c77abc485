//! The entry point: opening, upgrading, listing and deleting databases.

use crate::catalog::Catalog;
use crate::config::Config;
use crate::connection::Connection;
use crate::database::DatabaseInner;
use crate::error::{CoreError, CoreResult};
use crate::events::{EventSink, NoopSink, VersionChangeEvent};
use crate::key;
use crate::schema;
use crate::transaction::{Transaction, TransactionInner, TransactionMode, TransactionOutcome};
use parking_lot::Mutex;
use shelfdb_codec::{Codec, SerialCodec, Value};
use shelfdb_storage::StorageBackend;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name and version of a stored database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Current version.
    pub version: u64,
}

/// Handed to the upgrade callback of [`Factory::open`].
#[derive(Debug, Clone)]
pub struct UpgradeContext {
    /// The version change transaction; schema changes go through it.
    pub transaction: Transaction,
    /// The connection being opened.
    pub connection: Connection,
    /// The version before the upgrade; 0 for a new database.
    pub old_version: u64,
    /// The version being upgraded to.
    pub new_version: u64,
}

/// Opens databases stored in one backend.
///
/// # Example
///
/// ```rust
/// use shelfdb_core::{CoreResult, Factory, ObjectStoreOptions, Query, TransactionMode};
/// use shelfdb_storage::InMemoryBackend;
/// use std::sync::Arc;
///
/// async fn demo() -> CoreResult<()> {
///     let factory = Factory::new(Arc::new(InMemoryBackend::new()));
///     let db = factory
///         .open("library", Some(1), |upgrade| async move {
///             upgrade
///                 .transaction
///                 .create_object_store("books", ObjectStoreOptions::key_path("isbn"))?;
///             Ok(())
///         })
///         .await?;
///
///     let txn = db.transaction(&["books"], TransactionMode::ReadOnly)?;
///     let count = txn.object_store("books")?.count(Query::All)?.await?;
///     assert_eq!(count, 0);
///     Ok(())
/// }
/// ```
pub struct Factory {
    catalog: Arc<Catalog>,
    config: Arc<Config>,
    sink: Arc<dyn EventSink>,
    databases: Mutex<HashMap<String, Arc<DatabaseInner>>>,
    queues: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Factory {
    /// Creates a factory with the default configuration and codec.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::build(backend, Arc::new(SerialCodec), Config::default(), Arc::new(NoopSink))
    }

    fn build(
        backend: Arc<dyn StorageBackend>,
        codec: Arc<dyn Codec>,
        config: Config,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            catalog: Arc::new(Catalog::new(backend, codec, &config.storage_prefix)),
            config: Arc::new(config),
            sink,
            databases: Mutex::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Builder for a factory with a custom configuration, codec or sink.
    #[must_use]
    pub fn builder(backend: Arc<dyn StorageBackend>) -> FactoryBuilder {
        FactoryBuilder {
            backend,
            codec: Arc::new(SerialCodec),
            config: Config::default(),
            sink: Arc::new(NoopSink),
        }
    }

    /// Compares two values as keys.
    ///
    /// # Errors
    ///
    /// `DataError` if either value is not a valid key.
    pub fn cmp(a: &Value, b: &Value) -> CoreResult<Ordering> {
        key::compare(a, b)
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn queue(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.queues
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    async fn database(&self, name: &str) -> CoreResult<Option<Arc<DatabaseInner>>> {
        let cached = self.databases.lock().get(name).cloned();
        if cached.is_some() {
            return Ok(cached);
        }
        let loaded = DatabaseInner::load(
            name,
            Arc::clone(&self.catalog),
            Arc::clone(&self.config),
            Arc::clone(&self.sink),
        )
        .await?;
        if let Some(db) = &loaded {
            self.databases
                .lock()
                .insert(name.to_string(), Arc::clone(db));
        }
        Ok(loaded)
    }

    /// Opens a database, creating or upgrading it as needed.
    ///
    /// `version` defaults to the current version, or 1 for a new database.
    /// When it is higher than the stored version, other connections are
    /// asked to close, and once they have, `upgrade` runs inside a version
    /// change transaction. Opens and deletes of one database are served in
    /// call order.
    ///
    /// # Errors
    ///
    /// - `InvalidAccessError` for version 0.
    /// - `VersionError` if `version` is below the stored version.
    /// - `AbortError` if the upgrade aborted, the callback failed, or the
    ///   connection was closed during the upgrade. A callback failing after
    ///   the upgrade already committed leaves the upgrade in place.
    pub async fn open<F, Fut>(&self, name: &str, version: Option<u64>, upgrade: F) -> CoreResult<Connection>
    where
        F: FnOnce(UpgradeContext) -> Fut,
        Fut: Future<Output = CoreResult<()>>,
    {
        if version == Some(0) {
            return Err(CoreError::invalid_access("the version must be at least 1"));
        }
        let queue = self.queue(name);
        let _turn = queue.lock().await;

        let db = match self.database(name).await? {
            Some(db) => db,
            None => {
                let db = DatabaseInner::create(
                    name,
                    Arc::clone(&self.catalog),
                    Arc::clone(&self.config),
                    Arc::clone(&self.sink),
                )
                .await?;
                self.databases
                    .lock()
                    .insert(name.to_string(), Arc::clone(&db));
                db
            }
        };
        let old_version = db.version();
        let new_version = version.unwrap_or(old_version.max(1));
        if new_version < old_version {
            return Err(CoreError::version(format!(
                "requested version {new_version} is below the current version {old_version}"
            )));
        }

        let connection = Connection::open(Arc::clone(&db), new_version);
        if new_version > old_version {
            self.upgrade(&db, &connection, old_version, new_version, upgrade)
                .await?;
        }
        Ok(connection)
    }

    async fn upgrade<F, Fut>(
        &self,
        db: &Arc<DatabaseInner>,
        connection: &Connection,
        old_version: u64,
        new_version: u64,
        upgrade: F,
    ) -> CoreResult<()>
    where
        F: FnOnce(UpgradeContext) -> Fut,
        Fut: Future<Output = CoreResult<()>>,
    {
        let id = connection.inner.id;
        self.wait_for_others(db, Some(id), old_version, Some(new_version))
            .await;

        info!(database = %db.name, old_version, new_version, "upgrading database");
        let txn = TransactionInner::new(Arc::clone(db), TransactionMode::VersionChange, BTreeSet::new(), id);
        schema::set_version(&txn, new_version);
        db.register(Arc::clone(&txn));

        let context = UpgradeContext {
            transaction: Transaction::new(Arc::clone(&txn)),
            connection: connection.clone(),
            old_version,
            new_version,
        };
        let failure = upgrade(context).await.err();
        if let Some(err) = &failure {
            debug!(database = %db.name, error = %err, "upgrade callback failed");
            if let Err(abort_err) = txn.abort() {
                debug!(database = %db.name, error = %abort_err, "upgrade can no longer be aborted");
            }
        }

        match txn.done().await {
            TransactionOutcome::Committed => {
                if let Some(err) = failure {
                    warn!(database = %db.name, error = %err, "upgrade callback failed after the upgrade committed");
                    connection.close();
                    return Err(CoreError::abort(format!(
                        "the upgrade callback failed after the upgrade committed: {err}"
                    )));
                }
                if connection.inner.is_close_pending() {
                    return Err(CoreError::abort("the connection was closed during the upgrade"));
                }
                Ok(())
            }
            TransactionOutcome::Aborted(error) => {
                connection.close();
                if old_version == 0 {
                    self.forget(db).await?;
                }
                Err(CoreError::abort(match error.or(failure) {
                    Some(err) => format!("the upgrade was aborted: {err}"),
                    None => "the upgrade was aborted".to_string(),
                }))
            }
        }
    }

    /// Notifies every open connection except `except` of a version change,
    /// reports `blocked` if any stays open, and waits for them to close.
    async fn wait_for_others(
        &self,
        db: &Arc<DatabaseInner>,
        except: Option<u64>,
        old_version: u64,
        new_version: Option<u64>,
    ) {
        let others: Vec<_> = db
            .open_connections()
            .into_iter()
            .filter(|connection| Some(connection.id) != except)
            .collect();
        if others.is_empty() {
            return;
        }
        let event = VersionChangeEvent {
            old_version,
            new_version,
        };
        for other in &others {
            other.notify_version_change(event);
        }
        let still_open = db
            .open_connections()
            .iter()
            .any(|connection| Some(connection.id) != except);
        if still_open {
            debug!(database = %db.name, "blocked by open connections");
            self.sink.blocked(&db.name, old_version, new_version);
        }
        db.wait_for_connections(except).await;
    }

    /// Drops a database from the cache and the backend.
    async fn forget(&self, db: &Arc<DatabaseInner>) -> CoreResult<()> {
        db.purge().await?;
        self.databases.lock().remove(&db.name);
        Ok(())
    }

    /// Deletes a database and returns the version it had, or 0 if it did
    /// not exist. Open connections are asked to close first.
    ///
    /// # Errors
    ///
    /// Storage or codec errors from the backend.
    pub async fn delete_database(&self, name: &str) -> CoreResult<u64> {
        let queue = self.queue(name);
        let _turn = queue.lock().await;
        let Some(db) = self.database(name).await? else {
            return Ok(0);
        };
        let version = db.version();
        self.wait_for_others(&db, None, version, None).await;
        self.forget(&db).await?;
        info!(database = name, version, "database deleted");
        Ok(version)
    }

    /// Every stored database with its version, sorted by name.
    ///
    /// # Errors
    ///
    /// Storage or codec errors from the backend.
    pub async fn databases(&self) -> CoreResult<Vec<DatabaseInfo>> {
        let mut infos = Vec::new();
        for name in self.catalog.database_names().await? {
            if let Some(entry) = self.catalog.database_entry(&name).await? {
                infos.push(DatabaseInfo {
                    name: entry.name,
                    version: entry.version,
                });
            }
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }
}

/// Configures a [`Factory`].
pub struct FactoryBuilder {
    backend: Arc<dyn StorageBackend>,
    codec: Arc<dyn Codec>,
    config: Config,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for FactoryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FactoryBuilder {
    /// Uses `config`.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Uses `codec` to encode record payloads.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Reports outcomes to `sink`.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Builds the factory.
    #[must_use]
    pub fn build(self) -> Factory {
        Factory::build(self.backend, self.codec, self.config, self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;
    use crate::range::Query;
    use crate::schema::{IndexOptions, ObjectStoreOptions};
    use crate::CoreError;
    use shelfdb_storage::InMemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn record(id: i32, title: &str) -> Value {
        Value::object([("id", Value::from(id)), ("title", Value::from(title))])
    }

    async fn open_library(factory: &Factory) -> Connection {
        factory
            .open("library", Some(1), |upgrade| async move {
                upgrade
                    .transaction
                    .create_object_store("books", ObjectStoreOptions::key_path("id"))?;
                Ok(())
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn open_creates_database_and_runs_upgrade() {
        let factory = Factory::new(Arc::new(InMemoryBackend::new()));
        let seen = Arc::new(Mutex::new(None));
        let seen_in_upgrade = Arc::clone(&seen);
        let db = factory
            .open("library", None, |upgrade| async move {
                *seen_in_upgrade.lock() = Some((upgrade.old_version, upgrade.new_version));
                upgrade
                    .transaction
                    .create_object_store("books", ObjectStoreOptions::key_path("id"))?;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(*seen.lock(), Some((0, 1)));
        assert_eq!(db.version(), 1);
        assert_eq!(db.object_store_names(), vec!["books".to_string()]);
        assert_eq!(
            factory.databases().await.unwrap(),
            vec![DatabaseInfo {
                name: "library".into(),
                version: 1
            }]
        );
    }

    #[tokio::test]
    async fn reopening_at_the_current_version_skips_upgrade() {
        let factory = Factory::new(Arc::new(InMemoryBackend::new()));
        let first = open_library(&factory).await;
        let called = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&called);
        let second = factory
            .open("library", None, |_| async move {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(called.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(second.version(), 1);
        first.close();
        second.close();
    }

    #[tokio::test]
    async fn rejects_version_zero_and_downgrades() {
        let factory = Factory::new(Arc::new(InMemoryBackend::new()));
        let err = factory
            .open("library", Some(0), |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidAccessError(_)));

        let db = factory
            .open("library", Some(3), |_| async { Ok(()) })
            .await
            .unwrap();
        db.close();
        let err = factory
            .open("library", Some(2), |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::VersionError(_)));
    }

    #[tokio::test]
    async fn failed_upgrade_of_new_database_leaves_nothing_behind() {
        let factory = Factory::new(Arc::new(InMemoryBackend::new()));
        let err = factory
            .open("library", Some(1), |upgrade| async move {
                upgrade
                    .transaction
                    .create_object_store("books", ObjectStoreOptions::default())?;
                Err(CoreError::data("refusing this schema"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AbortError(_)));
        assert!(factory.databases().await.unwrap().is_empty());

        let db = factory
            .open("library", Some(1), |_| async { Ok(()) })
            .await
            .unwrap();
        assert!(db.object_store_names().is_empty());
    }

    #[tokio::test]
    async fn failed_upgrade_keeps_previous_schema_and_version() {
        let factory = Factory::new(Arc::new(InMemoryBackend::new()));
        open_library(&factory).await.close();

        let err = factory
            .open("library", Some(2), |upgrade| async move {
                upgrade.transaction.delete_object_store("books")?;
                upgrade
                    .transaction
                    .create_object_store("authors", ObjectStoreOptions::default())?;
                upgrade.transaction.abort()?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AbortError(_)));

        let db = factory
            .open("library", None, |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(db.version(), 1);
        assert_eq!(db.object_store_names(), vec!["books".to_string()]);
    }

    async fn open_indexed_library(factory: &Factory) {
        factory
            .open("library", Some(1), |upgrade| async move {
                let books = upgrade
                    .transaction
                    .create_object_store("books", ObjectStoreOptions::key_path("id"))?;
                books.create_index("by_title", "title", IndexOptions::unique())?;
                books.put(record(1, "Dune"), None)?.await?;
                books.put(record(2, "Emma"), None)?.await?;
                Ok(())
            })
            .await
            .unwrap()
            .close();
    }

    async fn title_index_keys(factory: &Factory) -> Vec<Key> {
        let db = factory
            .open("library", None, |_| async { Ok(()) })
            .await
            .unwrap();
        let txn = db.transaction(&["books"], TransactionMode::ReadOnly).unwrap();
        let by_title = txn.object_store("books").unwrap().index("by_title").unwrap();
        let keys = by_title.get_all_keys(Query::All, None).unwrap().await.unwrap();
        db.close();
        keys
    }

    #[tokio::test]
    async fn aborted_index_delete_restores_entries_once() {
        let factory = Factory::new(Arc::new(InMemoryBackend::new()));
        open_indexed_library(&factory).await;

        let err = factory
            .open("library", Some(2), |upgrade| async move {
                let books = upgrade.transaction.object_store("books")?;
                books.delete_index("by_title")?;
                books.delete(1)?.await?;
                books.put(record(2, "Middlemarch"), None)?.await?;
                upgrade.transaction.abort()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AbortError(_)));
        assert_eq!(title_index_keys(&factory).await, vec![Key::from(1), Key::from(2)]);

        let err = factory
            .open("library", Some(2), |upgrade| async move {
                let books = upgrade.transaction.object_store("books")?;
                books.delete_index("by_title")?;
                books.clear()?.await?;
                upgrade.transaction.abort()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AbortError(_)));
        assert_eq!(title_index_keys(&factory).await, vec![Key::from(1), Key::from(2)]);
    }

    #[tokio::test]
    async fn callback_failing_after_commit_is_reported() {
        let factory = Factory::new(Arc::new(InMemoryBackend::new()));
        let err = factory
            .open("library", Some(1), |upgrade| async move {
                let books = upgrade
                    .transaction
                    .create_object_store("books", ObjectStoreOptions::key_path("id"))?;
                books.put(record(1, "Dune"), None)?.await?;
                for _ in 0..10 {
                    tokio::task::yield_now().await;
                }
                Err(CoreError::data("rejected after the last request"))
            })
            .await
            .unwrap_err();
        match err {
            CoreError::AbortError(message) => assert!(message.contains("rejected after the last request")),
            other => panic!("unexpected error: {other}"),
        }

        // The upgrade had already committed.
        let db = factory
            .open("library", None, |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(db.version(), 1);
        assert_eq!(db.object_store_names(), vec!["books".to_string()]);
    }

    #[tokio::test]
    async fn data_survives_a_new_factory_on_the_same_backend() {
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        {
            let factory = Factory::new(Arc::clone(&backend));
            let db = open_library(&factory).await;
            let txn = db.transaction(&["books"], TransactionMode::ReadWrite).unwrap();
            let books = txn.object_store("books").unwrap();
            books.put(record(1, "Dune"), None).unwrap().await.unwrap();
            books.put(record(2, "Emma"), None).unwrap().await.unwrap();
            assert!(txn.done().await.is_committed());
            db.close();
        }

        let factory = Factory::new(backend);
        let db = factory
            .open("library", None, |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(db.version(), 1);
        let txn = db.transaction(&["books"], TransactionMode::ReadOnly).unwrap();
        let books = txn.object_store("books").unwrap();
        let stored = books.get(2).unwrap().await.unwrap();
        assert_eq!(stored, Some(record(2, "Emma")));
        assert_eq!(books.count(Query::All).unwrap().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn upgrade_waits_for_other_connections_to_close() {
        let factory = Factory::new(Arc::new(InMemoryBackend::new()));
        let old = open_library(&factory).await;
        let notified = Arc::new(Mutex::new(None));
        let notified_in_handler = Arc::clone(&notified);
        old.on_version_change(move |connection, event| {
            *notified_in_handler.lock() = Some(event);
            connection.close();
        });

        let new = factory
            .open("library", Some(2), |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(new.version(), 2);
        assert!(old.is_closed());
        assert_eq!(
            *notified.lock(),
            Some(VersionChangeEvent {
                old_version: 1,
                new_version: Some(2)
            })
        );
        let err = old
            .transaction(&["books"], TransactionMode::ReadOnly)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidStateError(_)));
    }

    #[tokio::test]
    async fn delete_database_reports_previous_version() {
        let factory = Factory::new(Arc::new(InMemoryBackend::new()));
        assert_eq!(factory.delete_database("missing").await.unwrap(), 0);

        let db = open_library(&factory).await;
        db.on_version_change(|connection, event| {
            assert_eq!(event.new_version, None);
            connection.close();
        });
        assert_eq!(factory.delete_database("library").await.unwrap(), 1);
        assert!(db.is_closed());
        assert!(factory.databases().await.unwrap().is_empty());

        let reopened = factory
            .open("library", None, |upgrade| async move {
                assert_eq!(upgrade.old_version, 0);
                Ok(())
            })
            .await
            .unwrap();
        assert!(reopened.object_store_names().is_empty());
    }

    #[test]
    fn cmp_orders_values_as_keys() {
        assert_eq!(
            Factory::cmp(&Value::from(1), &Value::from("a")).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            Factory::cmp(&Value::from("b"), &Value::from("a")).unwrap(),
            Ordering::Greater
        );
        assert!(Factory::cmp(&Value::Bool(true), &Value::from(1)).is_err());
    }
}

//! Per-database engine state.
//!
//! A [`DatabaseInner`] is shared by every connection to one database. It
//! owns the in-memory schema (version and object stores), the list of
//! transactions the scheduler works through, and the set of open
//! connections that upgrades and deletes wait on.

use crate::catalog::{self, Catalog, DatabaseEntry};
use crate::config::Config;
use crate::connection::ConnectionInner;
use crate::error::CoreResult;
use crate::events::EventSink;
use crate::index::Index;
use crate::object_store::ObjectStore;
use crate::transaction::scheduler;
use crate::transaction::{TransactionInner, TransactionMode};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

struct Schema {
    version: u64,
    stores: BTreeMap<String, Arc<ObjectStore>>,
}

pub(crate) struct DatabaseInner {
    pub(crate) name: String,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) config: Arc<Config>,
    pub(crate) sink: Arc<dyn EventSink>,
    schema: Mutex<Schema>,
    pub(crate) transactions: Mutex<Vec<Arc<TransactionInner>>>,
    connections: Mutex<Vec<Arc<ConnectionInner>>>,
    connections_changed: Notify,
}

impl DatabaseInner {
    fn with_schema(
        name: &str,
        catalog: Arc<Catalog>,
        config: Arc<Config>,
        sink: Arc<dyn EventSink>,
        schema: Schema,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            catalog,
            config,
            sink,
            schema: Mutex::new(schema),
            transactions: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
            connections_changed: Notify::new(),
        })
    }

    /// Loads a persisted database, or returns `None` if it does not exist.
    pub(crate) async fn load(
        name: &str,
        catalog: Arc<Catalog>,
        config: Arc<Config>,
        sink: Arc<dyn EventSink>,
    ) -> CoreResult<Option<Arc<Self>>> {
        let Some(entry) = catalog.database_entry(name).await? else {
            return Ok(None);
        };
        let mut stores = BTreeMap::new();
        for store_entry in catalog.store_entries(name).await? {
            let indexes = catalog
                .index_entries(&store_entry.id)
                .await?
                .into_iter()
                .map(|entry| Index::from_entry(entry, Arc::clone(&catalog)))
                .collect();
            let store = ObjectStore::from_entry(
                store_entry,
                indexes,
                config.max_generated_key,
                name.to_string(),
                Arc::clone(&catalog),
            );
            stores.insert(store.name(), Arc::new(store));
        }
        debug!(database = name, version = entry.version, stores = stores.len(), "database loaded");
        let schema = Schema {
            version: entry.version,
            stores,
        };
        Ok(Some(Self::with_schema(name, catalog, config, sink, schema)))
    }

    /// Creates and persists an empty database at version 0.
    pub(crate) async fn create(
        name: &str,
        catalog: Arc<Catalog>,
        config: Arc<Config>,
        sink: Arc<dyn EventSink>,
    ) -> CoreResult<Arc<Self>> {
        let schema = Schema {
            version: 0,
            stores: BTreeMap::new(),
        };
        let db = Self::with_schema(name, catalog, config, sink, schema);
        db.persist_entry().await?;
        let mut names = db.catalog.database_names().await?;
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
            db.catalog.write_json(catalog::DATABASE_LIST, &names).await?;
        }
        debug!(database = name, "database created");
        Ok(db)
    }

    /// Removes every persisted trace of the database.
    pub(crate) async fn purge(&self) -> CoreResult<()> {
        for store in self.stores() {
            for index in store.indexes() {
                index.records.purge().await?;
                self.catalog
                    .remove(&catalog::index_entry(&store.id, &index.id))
                    .await?;
            }
            self.catalog.remove(&catalog::index_list(&store.id)).await?;
            store.records.purge().await?;
            self.catalog
                .remove(&catalog::store_entry(&self.name, &store.id))
                .await?;
        }
        self.catalog.remove(&catalog::store_list(&self.name)).await?;
        self.catalog
            .remove(&catalog::database_entry(&self.name))
            .await?;
        let mut names = self.catalog.database_names().await?;
        names.retain(|n| n != &self.name);
        self.catalog.write_json(catalog::DATABASE_LIST, &names).await?;
        debug!(database = %self.name, "database purged");
        Ok(())
    }

    pub(crate) fn version(&self) -> u64 {
        self.schema.lock().version
    }

    pub(crate) fn set_version(&self, version: u64) {
        self.schema.lock().version = version;
    }

    pub(crate) async fn persist_entry(&self) -> CoreResult<()> {
        let entry = DatabaseEntry {
            name: self.name.clone(),
            version: self.version(),
        };
        self.catalog
            .write_json(&catalog::database_entry(&self.name), &entry)
            .await
    }

    pub(crate) async fn persist_store_list(&self) -> CoreResult<()> {
        let ids: Vec<String> = self.stores().iter().map(|store| store.id.clone()).collect();
        self.catalog
            .write_json(&catalog::store_list(&self.name), &ids)
            .await
    }

    pub(crate) fn store(&self, name: &str) -> Option<Arc<ObjectStore>> {
        self.schema.lock().stores.get(name).cloned()
    }

    /// Stores ordered by name.
    pub(crate) fn stores(&self) -> Vec<Arc<ObjectStore>> {
        self.schema.lock().stores.values().cloned().collect()
    }

    pub(crate) fn store_names(&self) -> Vec<String> {
        self.schema.lock().stores.keys().cloned().collect()
    }

    pub(crate) fn insert_store(&self, store: Arc<ObjectStore>) {
        self.schema.lock().stores.insert(store.name(), store);
    }

    pub(crate) fn remove_store(&self, name: &str) -> Option<Arc<ObjectStore>> {
        self.schema.lock().stores.remove(name)
    }

    pub(crate) fn rename_store(&self, from: &str, to: &str) {
        let mut schema = self.schema.lock();
        if let Some(store) = schema.stores.remove(from) {
            store.set_name(to.to_string());
            schema.stores.insert(to.to_string(), store);
        }
    }

    /// Hands a new transaction to the scheduler.
    pub(crate) fn register(self: &Arc<Self>, txn: Arc<TransactionInner>) {
        self.transactions.lock().push(txn);
        scheduler::process_transactions(self);
    }

    pub(crate) fn on_transaction_finished(self: &Arc<Self>) {
        self.resolve_pending_closes();
        scheduler::process_transactions(self);
    }

    fn has_unfinished_transactions(&self, connection: u64) -> bool {
        self.transactions
            .lock()
            .iter()
            .any(|txn| txn.connection == connection && !txn.is_finished())
    }

    /// Returns true while `connection` runs an unfinished version change
    /// transaction.
    pub(crate) fn in_version_change(&self, connection: u64) -> bool {
        self.transactions.lock().iter().any(|txn| {
            txn.connection == connection
                && txn.mode == TransactionMode::VersionChange
                && !txn.is_finished()
        })
    }

    pub(crate) fn add_connection(&self, connection: Arc<ConnectionInner>) {
        self.connections.lock().push(connection);
    }

    /// Connections that are still open, oldest first.
    pub(crate) fn open_connections(&self) -> Vec<Arc<ConnectionInner>> {
        self.connections.lock().clone()
    }

    fn has_open_connections_except(&self, except: Option<u64>) -> bool {
        self.connections
            .lock()
            .iter()
            .any(|connection| Some(connection.id) != except)
    }

    /// Closes every close-pending connection whose transactions have all
    /// finished, waking anyone waiting for connections to go away.
    pub(crate) fn resolve_pending_closes(&self) {
        let pending: Vec<Arc<ConnectionInner>> = self
            .connections
            .lock()
            .iter()
            .filter(|connection| connection.is_close_pending())
            .cloned()
            .collect();
        let mut closed = Vec::new();
        for connection in pending {
            if !self.has_unfinished_transactions(connection.id) {
                connection.mark_closed();
                closed.push(connection.id);
            }
        }
        if closed.is_empty() {
            return;
        }
        self.connections
            .lock()
            .retain(|connection| !closed.contains(&connection.id));
        debug!(database = %self.name, closed = closed.len(), "connections closed");
        self.connections_changed.notify_waiters();
    }

    /// Waits until every connection other than `except` has closed.
    pub(crate) async fn wait_for_connections(&self, except: Option<u64>) {
        loop {
            let notified = self.connections_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.has_open_connections_except(except) {
                return;
            }
            notified.await;
        }
    }
}

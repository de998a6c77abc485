//! Schema changes inside a version change transaction.
//!
//! Each change is applied to the in-memory schema at call time and
//! registers an immediate rollback step that reverts it. Persisting the
//! change is queued as an internal operation; the matching transactional
//! rollback step re-persists whatever the in-memory schema looks like after
//! the immediate steps have run, or removes what was written.

use crate::catalog::{self, new_id};
use crate::error::{CoreError, CoreResult};
use crate::handle::{IndexHandle, ObjectStoreHandle};
use crate::index::Index;
use crate::key_generator::KeyGenerator;
use crate::key_path::KeyPath;
use crate::object_store::ObjectStore;
use crate::transaction::{Transaction, TransactionInner};
use std::sync::Arc;
use tracing::debug;

/// Parameters of a new object store.
#[derive(Debug, Clone, Default)]
pub struct ObjectStoreOptions {
    /// Derive primary keys from values along this path.
    pub key_path: Option<KeyPath>,
    /// Generate primary keys.
    pub auto_increment: bool,
}

impl ObjectStoreOptions {
    /// Keys derived from values along `key_path`.
    #[must_use]
    pub fn key_path(key_path: impl Into<KeyPath>) -> Self {
        Self {
            key_path: Some(key_path.into()),
            auto_increment: false,
        }
    }

    /// Enables the key generator.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// Parameters of a new index.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// Reject two records with the same index key.
    pub unique: bool,
    /// Index each element of an array key separately.
    pub multi_entry: bool,
}

impl IndexOptions {
    /// A unique index.
    #[must_use]
    pub fn unique() -> Self {
        Self {
            unique: true,
            multi_entry: false,
        }
    }

    /// A multi-entry index.
    #[must_use]
    pub fn multi_entry() -> Self {
        Self {
            unique: false,
            multi_entry: true,
        }
    }
}

fn check_schema_change(txn: &TransactionInner) -> CoreResult<()> {
    txn.require_version_change()?;
    txn.require_active()
}

/// Bumps the database version inside an upgrade.
pub(crate) fn set_version(txn: &Arc<TransactionInner>, version: u64) {
    let db = Arc::clone(&txn.db);
    let previous = db.version();
    db.set_version(version);
    {
        let db = Arc::clone(&db);
        txn.rollback.push_immediate(move || db.set_version(previous));
    }
    {
        let db = Arc::clone(&db);
        txn.rollback
            .push_transactional(move || async move { db.persist_entry().await });
    }
    txn.queue_internal(move || async move { db.persist_entry().await });
}

impl Transaction {
    /// Creates an object store.
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` outside an upgrade, `TransactionInactiveError`
    ///   unless active.
    /// - `SyntaxError` for a malformed key path.
    /// - `ConstraintError` if the name is taken.
    /// - `InvalidAccessError` for a key generator combined with an empty or
    ///   sequence key path.
    pub fn create_object_store(&self, name: &str, options: ObjectStoreOptions) -> CoreResult<ObjectStoreHandle> {
        let txn = &self.inner;
        check_schema_change(txn)?;
        if let Some(key_path) = &options.key_path {
            key_path.validate()?;
        }
        let db = Arc::clone(&txn.db);
        if db.store(name).is_some() {
            return Err(CoreError::constraint(format!("object store {name:?} already exists")));
        }
        if let Some(key_path) = &options.key_path {
            let unusable = key_path.is_sequence() || matches!(key_path, KeyPath::Single(p) if p.is_empty());
            if options.auto_increment && unusable {
                return Err(CoreError::invalid_access(
                    "a key generator needs a non-empty, single key path",
                ));
            }
        }

        let store = Arc::new(ObjectStore::new(
            new_id(),
            name.to_string(),
            options.key_path,
            options
                .auto_increment
                .then(|| KeyGenerator::new(db.config.max_generated_key)),
            db.name.clone(),
            Arc::clone(&db.catalog),
        ));
        db.insert_store(Arc::clone(&store));
        debug!(database = %db.name, store = name, "object store created");

        {
            let (db, store) = (Arc::clone(&db), Arc::clone(&store));
            txn.rollback.push_immediate(move || {
                store.set_deleted(true);
                db.remove_store(&store.name());
            });
        }
        {
            let (db, store) = (Arc::clone(&db), Arc::clone(&store));
            txn.rollback.push_transactional(move || async move {
                store.records.purge().await?;
                db.catalog
                    .remove(&catalog::store_entry(&db.name, &store.id))
                    .await?;
                db.persist_store_list().await
            });
        }
        {
            let (db, store) = (Arc::clone(&db), Arc::clone(&store));
            txn.queue_internal(move || async move {
                store.persist_entry().await?;
                db.persist_store_list().await
            });
        }
        Ok(ObjectStoreHandle::new(Arc::clone(txn), store))
    }

    /// Deletes an object store with all its records and indexes.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` outside an upgrade, `TransactionInactiveError`
    /// unless active, `NotFoundError` if there is no such store.
    pub fn delete_object_store(&self, name: &str) -> CoreResult<()> {
        let txn = &self.inner;
        check_schema_change(txn)?;
        let db = Arc::clone(&txn.db);
        let store = db
            .remove_store(name)
            .ok_or_else(|| CoreError::not_found(format!("no object store named {name:?}")))?;
        store.set_deleted(true);
        debug!(database = %db.name, store = name, "object store deleted");

        {
            let (db, store) = (Arc::clone(&db), Arc::clone(&store));
            txn.rollback.push_immediate(move || {
                store.set_deleted(false);
                db.insert_store(store);
            });
        }
        let rollback = txn.rollback.clone();
        txn.queue_internal(move || async move {
            let records = store.records.purge().await?;
            let mut indexes = Vec::new();
            for index in store.indexes() {
                let entries = index.records.purge().await?;
                db.catalog
                    .remove(&catalog::index_entry(&store.id, &index.id))
                    .await?;
                indexes.push((index, entries));
            }
            db.catalog.remove(&catalog::index_list(&store.id)).await?;
            db.catalog
                .remove(&catalog::store_entry(&db.name, &store.id))
                .await?;
            db.persist_store_list().await?;

            rollback.push_transactional(move || async move {
                store.records.restore(records).await?;
                for (index, entries) in indexes {
                    index.records.clear().await?;
                    index.records.restore(entries).await?;
                    db.catalog
                        .write_json(&catalog::index_entry(&store.id, &index.id), &index.entry())
                        .await?;
                }
                store.persist_index_list().await?;
                store.persist_entry().await?;
                db.persist_store_list().await
            });
            Ok(())
        });
        Ok(())
    }
}

impl ObjectStoreHandle {
    fn check_schema_change(&self) -> CoreResult<()> {
        self.txn.require_version_change()?;
        if self.store.is_deleted() {
            return Err(CoreError::invalid_state("the object store was deleted"));
        }
        self.txn.require_active()
    }

    /// Renames the store.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` outside an upgrade or for a deleted store,
    /// `TransactionInactiveError` unless active, `ConstraintError` if the
    /// name is taken.
    pub fn rename(&self, name: &str) -> CoreResult<()> {
        self.check_schema_change()?;
        let previous = self.store.name();
        if previous == name {
            return Ok(());
        }
        let db = Arc::clone(&self.txn.db);
        if db.store(name).is_some() {
            return Err(CoreError::constraint(format!("object store {name:?} already exists")));
        }
        db.rename_store(&previous, name);
        debug!(database = %db.name, from = %previous, to = name, "object store renamed");

        {
            let (db, current) = (Arc::clone(&db), name.to_string());
            self.txn
                .rollback
                .push_immediate(move || db.rename_store(&current, &previous));
        }
        {
            let store = Arc::clone(&self.store);
            self.txn
                .rollback
                .push_transactional(move || async move { store.persist_entry().await });
        }
        let store = Arc::clone(&self.store);
        self.txn
            .queue_internal(move || async move { store.persist_entry().await });
        Ok(())
    }

    /// Creates an index and backfills it from the store's records.
    ///
    /// A uniqueness violation among existing records aborts the upgrade
    /// once the backfill runs.
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` outside an upgrade or for a deleted store,
    ///   `TransactionInactiveError` unless active.
    /// - `ConstraintError` if the name is taken.
    /// - `SyntaxError` for a malformed key path.
    /// - `InvalidAccessError` for a multi-entry sequence key path.
    pub fn create_index(
        &self,
        name: &str,
        key_path: impl Into<KeyPath>,
        options: IndexOptions,
    ) -> CoreResult<IndexHandle> {
        self.check_schema_change()?;
        let key_path = key_path.into();
        if self.store.index(name).is_some() {
            return Err(CoreError::constraint(format!("index {name:?} already exists")));
        }
        key_path.validate()?;
        if key_path.is_sequence() && options.multi_entry {
            return Err(CoreError::invalid_access(
                "a multi-entry index cannot use a sequence key path",
            ));
        }

        let db = Arc::clone(&self.txn.db);
        let index = Arc::new(Index::new(
            new_id(),
            name.to_string(),
            key_path,
            options.multi_entry,
            options.unique,
            Arc::clone(&db.catalog),
        ));
        self.store.insert_index(Arc::clone(&index));
        debug!(database = %db.name, store = %self.store.name(), index = name, "index created");

        {
            let (store, index) = (Arc::clone(&self.store), Arc::clone(&index));
            self.txn.rollback.push_immediate(move || {
                index.set_deleted(true);
                store.remove_index(&index.name());
            });
        }
        {
            let (db, store, index) = (Arc::clone(&db), Arc::clone(&self.store), Arc::clone(&index));
            self.txn.rollback.push_transactional(move || async move {
                index.records.purge().await?;
                db.catalog
                    .remove(&catalog::index_entry(&store.id, &index.id))
                    .await?;
                store.persist_index_list().await
            });
        }
        {
            let (store, index) = (Arc::clone(&self.store), Arc::clone(&index));
            self.txn.queue_internal(move || async move {
                db.catalog
                    .write_json(&catalog::index_entry(&store.id, &index.id), &index.entry())
                    .await?;
                store.persist_index_list().await?;
                index.initialize(&store).await
            });
        }
        Ok(IndexHandle {
            txn: Arc::clone(&self.txn),
            store: Arc::clone(&self.store),
            index,
        })
    }

    /// Deletes an index.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` outside an upgrade or for a deleted store,
    /// `TransactionInactiveError` unless active, `NotFoundError` if there is
    /// no such index.
    pub fn delete_index(&self, name: &str) -> CoreResult<()> {
        self.check_schema_change()?;
        let index = self
            .store
            .remove_index(name)
            .ok_or_else(|| CoreError::not_found(format!("no index named {name:?}")))?;
        index.set_deleted(true);
        debug!(database = %self.txn.db.name, store = %self.store.name(), index = name, "index deleted");

        {
            let (store, index) = (Arc::clone(&self.store), Arc::clone(&index));
            self.txn.rollback.push_immediate(move || {
                index.set_deleted(false);
                store.insert_index(index);
            });
        }
        let db = Arc::clone(&self.txn.db);
        let store = Arc::clone(&self.store);
        let rollback = self.txn.rollback.clone();
        self.txn.queue_internal(move || async move {
            let entries = index.records.purge().await?;
            db.catalog
                .remove(&catalog::index_entry(&store.id, &index.id))
                .await?;
            store.persist_index_list().await?;
            // Records reinserted while unwinding have already been indexed
            // again by the time this runs.
            rollback.push_transactional(move || async move {
                index.records.clear().await?;
                index.records.restore(entries).await?;
                db.catalog
                    .write_json(&catalog::index_entry(&store.id, &index.id), &index.entry())
                    .await?;
                store.persist_index_list().await
            });
            Ok(())
        });
        Ok(())
    }
}

impl IndexHandle {
    /// Renames the index.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` outside an upgrade or for a deleted index,
    /// `TransactionInactiveError` unless active, `ConstraintError` if the
    /// name is taken.
    pub fn rename(&self, name: &str) -> CoreResult<()> {
        self.txn.require_version_change()?;
        if self.index.is_deleted() || self.store.is_deleted() {
            return Err(CoreError::invalid_state("the index was deleted"));
        }
        self.txn.require_active()?;
        let previous = self.index.name();
        if previous == name {
            return Ok(());
        }
        if self.store.index(name).is_some() {
            return Err(CoreError::constraint(format!("index {name:?} already exists")));
        }
        self.store.rename_index(&previous, name);

        {
            let (store, current) = (Arc::clone(&self.store), name.to_string());
            self.txn
                .rollback
                .push_immediate(move || store.rename_index(&current, &previous));
        }
        let persist = {
            let (db, store, index) = (Arc::clone(&self.txn.db), Arc::clone(&self.store), Arc::clone(&self.index));
            move || async move {
                db.catalog
                    .write_json(&catalog::index_entry(&store.id, &index.id), &index.entry())
                    .await
            }
        };
        self.txn.rollback.push_transactional(persist.clone());
        self.txn.queue_internal(persist);
        Ok(())
    }
}

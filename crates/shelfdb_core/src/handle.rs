//! Object store and index handles bound to a transaction.
//!
//! Every data call validates its arguments and the transaction state up
//! front, failing synchronously, then queues the actual work and returns a
//! [`Request`].

use crate::cursor::{Cursor, CursorDirection, Source};
use crate::error::{CoreError, CoreResult};
use crate::index::Index;
use crate::key::Key;
use crate::key_path::KeyPath;
use crate::object_store::ObjectStore;
use crate::range::Query;
use crate::request::{Request, Response};
use crate::transaction::TransactionInner;
use shelfdb_codec::Value;
use std::sync::Arc;

/// An object store as seen from one transaction.
#[derive(Clone)]
pub struct ObjectStoreHandle {
    pub(crate) txn: Arc<TransactionInner>,
    pub(crate) store: Arc<ObjectStore>,
}

impl std::fmt::Debug for ObjectStoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreHandle")
            .field("name", &self.store.name())
            .field("transaction", &self.txn.id)
            .finish()
    }
}

impl ObjectStoreHandle {
    pub(crate) fn new(txn: Arc<TransactionInner>, store: Arc<ObjectStore>) -> Self {
        Self { txn, store }
    }

    /// The store's current name.
    #[must_use]
    pub fn name(&self) -> String {
        self.store.name()
    }

    /// The key path, if keys are derived from values.
    #[must_use]
    pub fn key_path(&self) -> Option<&KeyPath> {
        self.store.key_path.as_ref()
    }

    /// Whether the store generates keys.
    #[must_use]
    pub fn auto_increment(&self) -> bool {
        self.store.auto_increment()
    }

    /// Names of the store's indexes, sorted.
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        self.store.index_names()
    }

    /// Opens one of the store's indexes.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` if the store was deleted or the transaction has
    /// finished; `NotFoundError` if there is no such index.
    pub fn index(&self, name: &str) -> CoreResult<IndexHandle> {
        self.check_usable()?;
        if self.txn.is_finished() {
            return Err(CoreError::invalid_state("the transaction has finished"));
        }
        let index = self
            .store
            .index(name)
            .ok_or_else(|| CoreError::not_found(format!("no index named {name:?}")))?;
        Ok(IndexHandle {
            txn: Arc::clone(&self.txn),
            store: Arc::clone(&self.store),
            index,
        })
    }

    fn check_usable(&self) -> CoreResult<()> {
        if self.store.is_deleted() {
            return Err(CoreError::invalid_state("the object store was deleted"));
        }
        Ok(())
    }

    fn check_readable(&self) -> CoreResult<()> {
        self.check_usable()?;
        self.txn.require_active()
    }

    fn check_writable(&self) -> CoreResult<()> {
        self.check_readable()?;
        self.txn.require_writable()
    }

    /// Works out the primary key for a put or add. `None` means the key
    /// generator supplies it.
    fn effective_key(&self, value: &Value, key: Option<Key>) -> CoreResult<Option<Key>> {
        let auto_increment = self.store.auto_increment();
        match (&self.store.key_path, key) {
            (Some(_), Some(_)) => Err(CoreError::data(
                "an explicit key cannot be given for a store with a key path",
            )),
            (None, Some(key)) => Ok(Some(key)),
            (None, None) if auto_increment => Ok(None),
            (None, None) => Err(CoreError::data(
                "the store has neither a key path nor a key generator, so a key is required",
            )),
            (Some(key_path), None) => match key_path.extract_key(value)? {
                Some(key) => Ok(Some(key)),
                None if auto_increment && key_path.can_inject(value) => Ok(None),
                None => Err(CoreError::data(format!(
                    "the value has no key at key path {key_path}"
                ))),
            },
        }
    }

    fn store_value(&self, value: Value, key: Option<Key>, no_overwrite: bool) -> CoreResult<Request<Key>> {
        self.check_writable()?;
        let key = self.effective_key(&value, key)?;
        let store = Arc::clone(&self.store);
        let rollback = self.txn.rollback.clone();
        self.txn.request(move || async move {
            let key = store
                .store_record(value, key, no_overwrite, Some(&rollback))
                .await?;
            Ok(Response::Key(Some(key)))
        })
    }

    /// Inserts or replaces a record; resolves to its primary key.
    ///
    /// # Errors
    ///
    /// `InvalidStateError`, `TransactionInactiveError`, `ReadOnlyError`, or
    /// `DataError` when no valid key can be determined.
    pub fn put(&self, value: impl Into<Value>, key: Option<Key>) -> CoreResult<Request<Key>> {
        self.store_value(value.into(), key, false)
    }

    /// Inserts a record; the request fails with `ConstraintError` if the key
    /// is taken.
    ///
    /// # Errors
    ///
    /// As [`ObjectStoreHandle::put`].
    pub fn add(&self, value: impl Into<Value>, key: Option<Key>) -> CoreResult<Request<Key>> {
        self.store_value(value.into(), key, true)
    }

    /// Deletes every record matching `query`.
    ///
    /// # Errors
    ///
    /// `InvalidStateError`, `TransactionInactiveError` or `ReadOnlyError`.
    pub fn delete(&self, query: impl Into<Query>) -> CoreResult<Request<()>> {
        self.check_writable()?;
        let query = query.into();
        let store = Arc::clone(&self.store);
        let rollback = self.txn.rollback.clone();
        self.txn.request(move || async move {
            store.delete_record(&query, Some(&rollback)).await?;
            Ok(Response::Empty)
        })
    }

    /// Deletes every record.
    ///
    /// # Errors
    ///
    /// As [`ObjectStoreHandle::delete`].
    pub fn clear(&self) -> CoreResult<Request<()>> {
        self.check_writable()?;
        let store = Arc::clone(&self.store);
        let rollback = self.txn.rollback.clone();
        self.txn.request(move || async move {
            store.clear(Some(&rollback)).await?;
            Ok(Response::Empty)
        })
    }

    /// The value of the first record matching `query`.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` or `TransactionInactiveError`.
    pub fn get(&self, query: impl Into<Query>) -> CoreResult<Request<Option<Value>>> {
        self.check_readable()?;
        let query = query.into();
        let store = Arc::clone(&self.store);
        self.txn
            .request(move || async move { Ok(Response::Value(store.get_value(&query).await?)) })
    }

    /// The primary key of the first record matching `query`.
    ///
    /// # Errors
    ///
    /// As [`ObjectStoreHandle::get`].
    pub fn get_key(&self, query: impl Into<Query>) -> CoreResult<Request<Option<Key>>> {
        self.check_readable()?;
        let query = query.into();
        let store = Arc::clone(&self.store);
        self.txn
            .request(move || async move { Ok(Response::Key(store.get_key(&query).await?)) })
    }

    /// Values of up to `count` matching records in key order.
    ///
    /// # Errors
    ///
    /// As [`ObjectStoreHandle::get`].
    pub fn get_all(&self, query: impl Into<Query>, count: Option<u32>) -> CoreResult<Request<Vec<Value>>> {
        self.check_readable()?;
        let query = query.into();
        let store = Arc::clone(&self.store);
        self.txn.request(move || async move {
            Ok(Response::Values(store.get_all_values(query, count).await?))
        })
    }

    /// Primary keys of up to `count` matching records in key order.
    ///
    /// # Errors
    ///
    /// As [`ObjectStoreHandle::get`].
    pub fn get_all_keys(&self, query: impl Into<Query>, count: Option<u32>) -> CoreResult<Request<Vec<Key>>> {
        self.check_readable()?;
        let query = query.into();
        let store = Arc::clone(&self.store);
        self.txn.request(move || async move {
            Ok(Response::Keys(store.get_all_keys(query, count).await?))
        })
    }

    /// Number of records matching `query`.
    ///
    /// # Errors
    ///
    /// As [`ObjectStoreHandle::get`].
    pub fn count(&self, query: impl Into<Query>) -> CoreResult<Request<u64>> {
        self.check_readable()?;
        let query = query.into();
        let store = Arc::clone(&self.store);
        self.txn
            .request(move || async move { Ok(Response::Count(store.count(&query).await?)) })
    }

    /// Opens a cursor over records and values.
    ///
    /// # Errors
    ///
    /// As [`ObjectStoreHandle::get`].
    pub fn open_cursor(&self, query: impl Into<Query>, direction: CursorDirection) -> CoreResult<Request<Option<Cursor>>> {
        self.cursor(query.into(), direction, false)
    }

    /// Opens a cursor over primary keys only.
    ///
    /// # Errors
    ///
    /// As [`ObjectStoreHandle::get`].
    pub fn open_key_cursor(
        &self,
        query: impl Into<Query>,
        direction: CursorDirection,
    ) -> CoreResult<Request<Option<Cursor>>> {
        self.cursor(query.into(), direction, true)
    }

    fn cursor(&self, query: Query, direction: CursorDirection, key_only: bool) -> CoreResult<Request<Option<Cursor>>> {
        self.check_readable()?;
        let source = Source::Store(Arc::clone(&self.store));
        Cursor::new(Arc::clone(&self.txn), source, query, direction, key_only).start()
    }
}

/// An index as seen from one transaction.
#[derive(Clone)]
pub struct IndexHandle {
    pub(crate) txn: Arc<TransactionInner>,
    pub(crate) store: Arc<ObjectStore>,
    pub(crate) index: Arc<Index>,
}

impl std::fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexHandle")
            .field("name", &self.index.name())
            .field("store", &self.store.name())
            .finish()
    }
}

impl IndexHandle {
    /// The index's current name.
    #[must_use]
    pub fn name(&self) -> String {
        self.index.name()
    }

    /// The key path deriving index keys from store values.
    #[must_use]
    pub fn key_path(&self) -> &KeyPath {
        &self.index.key_path
    }

    /// Whether index keys must be unique.
    #[must_use]
    pub fn unique(&self) -> bool {
        self.index.unique
    }

    /// Whether array keys fan out into one entry per element.
    #[must_use]
    pub fn multi_entry(&self) -> bool {
        self.index.multi_entry
    }

    /// The store this index belongs to.
    #[must_use]
    pub fn object_store(&self) -> ObjectStoreHandle {
        ObjectStoreHandle::new(Arc::clone(&self.txn), Arc::clone(&self.store))
    }

    fn check_readable(&self) -> CoreResult<()> {
        if self.index.is_deleted() || self.store.is_deleted() {
            return Err(CoreError::invalid_state("the index was deleted"));
        }
        self.txn.require_active()
    }

    /// The value of the first record whose index key matches `query`.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` or `TransactionInactiveError`.
    pub fn get(&self, query: impl Into<Query>) -> CoreResult<Request<Option<Value>>> {
        self.check_readable()?;
        let query = query.into();
        let (store, index) = (Arc::clone(&self.store), Arc::clone(&self.index));
        self.txn.request(move || async move {
            Ok(Response::Value(index.get_value(&store, &query).await?))
        })
    }

    /// The primary key of the first record whose index key matches `query`.
    ///
    /// # Errors
    ///
    /// As [`IndexHandle::get`].
    pub fn get_key(&self, query: impl Into<Query>) -> CoreResult<Request<Option<Key>>> {
        self.check_readable()?;
        let query = query.into();
        let index = Arc::clone(&self.index);
        self.txn
            .request(move || async move { Ok(Response::Key(index.get_key(&query).await?)) })
    }

    /// Values of up to `count` matching records in index order.
    ///
    /// # Errors
    ///
    /// As [`IndexHandle::get`].
    pub fn get_all(&self, query: impl Into<Query>, count: Option<u32>) -> CoreResult<Request<Vec<Value>>> {
        self.check_readable()?;
        let query = query.into();
        let (store, index) = (Arc::clone(&self.store), Arc::clone(&self.index));
        self.txn.request(move || async move {
            Ok(Response::Values(index.get_all_values(&store, query, count).await?))
        })
    }

    /// Primary keys of up to `count` matching records in index order.
    ///
    /// # Errors
    ///
    /// As [`IndexHandle::get`].
    pub fn get_all_keys(&self, query: impl Into<Query>, count: Option<u32>) -> CoreResult<Request<Vec<Key>>> {
        self.check_readable()?;
        let query = query.into();
        let index = Arc::clone(&self.index);
        self.txn.request(move || async move {
            Ok(Response::Keys(index.get_all_keys(query, count).await?))
        })
    }

    /// Number of index entries matching `query`.
    ///
    /// # Errors
    ///
    /// As [`IndexHandle::get`].
    pub fn count(&self, query: impl Into<Query>) -> CoreResult<Request<u64>> {
        self.check_readable()?;
        let query = query.into();
        let index = Arc::clone(&self.index);
        self.txn
            .request(move || async move { Ok(Response::Count(index.count(&query).await?)) })
    }

    /// Opens a cursor over index entries and their record values.
    ///
    /// # Errors
    ///
    /// As [`IndexHandle::get`].
    pub fn open_cursor(&self, query: impl Into<Query>, direction: CursorDirection) -> CoreResult<Request<Option<Cursor>>> {
        self.cursor(query.into(), direction, false)
    }

    /// Opens a cursor over index keys and primary keys only.
    ///
    /// # Errors
    ///
    /// As [`IndexHandle::get`].
    pub fn open_key_cursor(
        &self,
        query: impl Into<Query>,
        direction: CursorDirection,
    ) -> CoreResult<Request<Option<Cursor>>> {
        self.cursor(query.into(), direction, true)
    }

    fn cursor(&self, query: Query, direction: CursorDirection, key_only: bool) -> CoreResult<Request<Option<Cursor>>> {
        self.check_readable()?;
        let source = Source::Index(Arc::clone(&self.store), Arc::clone(&self.index));
        Cursor::new(Arc::clone(&self.txn), source, query, direction, key_only).start()
    }
}

//! Secondary indexes.
//!
//! An index is a [`RecordStore`] of `(index key, primary key)` records
//! derived from its object store's values through a key path. Entries are
//! added from the object store's own write path, so an index never sees a
//! record the store does not hold.

use crate::catalog::{Catalog, IndexEntry};
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::key_path::KeyPath;
use crate::object_store::ObjectStore;
use crate::range::Query;
use crate::record_store::{Record, RecordStore};
use parking_lot::Mutex;
use shelfdb_codec::Value;
use std::sync::Arc;
use tracing::debug;

struct IndexMeta {
    name: String,
    deleted: bool,
    initialized: bool,
}

pub(crate) struct Index {
    pub(crate) id: String,
    pub(crate) key_path: KeyPath,
    pub(crate) multi_entry: bool,
    pub(crate) unique: bool,
    meta: Mutex<IndexMeta>,
    pub(crate) records: RecordStore<Key>,
}

impl Index {
    /// Creates an index that still needs its backfill pass.
    pub(crate) fn new(
        id: String,
        name: String,
        key_path: KeyPath,
        multi_entry: bool,
        unique: bool,
        catalog: Arc<Catalog>,
    ) -> Self {
        Self {
            records: RecordStore::new_empty(id.clone(), catalog),
            id,
            key_path,
            multi_entry,
            unique,
            meta: Mutex::new(IndexMeta {
                name,
                deleted: false,
                initialized: false,
            }),
        }
    }

    /// Recreates a persisted, already backfilled index.
    pub(crate) fn from_entry(entry: IndexEntry, catalog: Arc<Catalog>) -> Self {
        Self {
            records: RecordStore::new(entry.id.clone(), catalog),
            id: entry.id,
            key_path: entry.key_path,
            multi_entry: entry.multi_entry,
            unique: entry.unique,
            meta: Mutex::new(IndexMeta {
                name: entry.name,
                deleted: false,
                initialized: true,
            }),
        }
    }

    pub(crate) fn entry(&self) -> IndexEntry {
        IndexEntry {
            id: self.id.clone(),
            name: self.name(),
            key_path: self.key_path.clone(),
            multi_entry: self.multi_entry,
            unique: self.unique,
        }
    }

    pub(crate) fn name(&self) -> String {
        self.meta.lock().name.clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        self.meta.lock().name = name;
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.meta.lock().deleted
    }

    pub(crate) fn set_deleted(&self, deleted: bool) {
        self.meta.lock().deleted = deleted;
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.meta.lock().initialized
    }

    /// The index keys `value` produces. Values without a usable key produce
    /// none; a multi-entry array fans out into its distinct valid elements.
    pub(crate) fn index_keys(&self, value: &Value) -> Vec<Key> {
        let Ok(Some(derived)) = self.key_path.extract(value) else {
            return Vec::new();
        };
        match derived {
            Value::Array(items) if self.multi_entry => {
                let mut keys: Vec<Key> = Vec::with_capacity(items.len());
                for key in items.iter().filter_map(|item| Key::try_from(item).ok()) {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
                keys
            }
            other => Key::try_from(&other).ok().into_iter().collect(),
        }
    }

    /// Fails if a unique index already maps one of `value`'s keys to a
    /// different primary key.
    pub(crate) async fn check_unique(&self, value: &Value, primary_key: &Key) -> CoreResult<()> {
        if !self.unique {
            return Ok(());
        }
        for key in self.index_keys(value) {
            let occupants = self.records.collect(Query::Key(key.clone()), None).await?;
            if occupants.iter().any(|record| &record.value != primary_key) {
                return Err(self.unique_violation(&key));
            }
        }
        Ok(())
    }

    fn unique_violation(&self, key: &Key) -> CoreError {
        CoreError::constraint(format!(
            "index {:?} already contains key {key}",
            self.name()
        ))
    }

    /// Adds the entries for one object store record.
    pub(crate) async fn store_record(&self, value: &Value, primary_key: &Key) -> CoreResult<()> {
        let keys = self.index_keys(value);
        if self.unique {
            for key in &keys {
                if self.records.get(&Query::Key(key.clone())).await?.is_some() {
                    return Err(self.unique_violation(key));
                }
            }
        }
        for key in keys {
            self.records
                .add(Record {
                    key,
                    value: primary_key.clone(),
                })
                .await?;
        }
        Ok(())
    }

    /// Backfills the index from every record currently in `store`.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` if the index was already initialised,
    /// `ConstraintError` if existing records violate uniqueness.
    pub(crate) async fn initialize(&self, store: &ObjectStore) -> CoreResult<()> {
        if self.is_initialized() {
            return Err(CoreError::invalid_state("index is already initialized"));
        }
        let records = store.records.collect(Query::All, None).await?;
        debug!(index = %self.name(), records = records.len(), "backfilling index");
        for record in records {
            self.store_record(&record.value, &record.key).await?;
        }
        self.meta.lock().initialized = true;
        Ok(())
    }

    pub(crate) async fn get_key(&self, query: &Query) -> CoreResult<Option<Key>> {
        Ok(self.records.get(query).await?.map(|record| record.value))
    }

    pub(crate) async fn get_all_keys(&self, query: Query, count: Option<u32>) -> CoreResult<Vec<Key>> {
        Ok(self
            .records
            .collect(query, count)
            .await?
            .into_iter()
            .map(|record| record.value)
            .collect())
    }

    pub(crate) async fn get_value(&self, store: &ObjectStore, query: &Query) -> CoreResult<Option<Value>> {
        match self.get_key(query).await? {
            Some(primary_key) => store.get_value(&Query::Key(primary_key)).await,
            None => Ok(None),
        }
    }

    pub(crate) async fn get_all_values(
        &self,
        store: &ObjectStore,
        query: Query,
        count: Option<u32>,
    ) -> CoreResult<Vec<Value>> {
        let mut values = Vec::new();
        for primary_key in self.get_all_keys(query, count).await? {
            if let Some(value) = store.get_value(&Query::Key(primary_key)).await? {
                values.push(value);
            }
        }
        Ok(values)
    }

    pub(crate) async fn count(&self, query: &Query) -> CoreResult<u64> {
        self.records.count(query).await
    }
}

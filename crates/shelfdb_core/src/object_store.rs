//! Object stores: primary records plus the indexes derived from them.

use crate::catalog::{self, Catalog, StoreEntry};
use crate::error::{CoreError, CoreResult};
use crate::index::Index;
use crate::key::Key;
use crate::key_generator::KeyGenerator;
use crate::key_path::KeyPath;
use crate::range::Query;
use crate::record_store::{Record, RecordStore};
use crate::rollback::SharedRollback;
use parking_lot::Mutex;
use shelfdb_codec::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

struct StoreMeta {
    name: String,
    deleted: bool,
}

pub(crate) struct ObjectStore {
    pub(crate) id: String,
    pub(crate) key_path: Option<KeyPath>,
    database: String,
    catalog: Arc<Catalog>,
    meta: Mutex<StoreMeta>,
    generator: Mutex<Option<KeyGenerator>>,
    pub(crate) records: RecordStore<Value>,
    indexes: Mutex<BTreeMap<String, Arc<Index>>>,
}

impl ObjectStore {
    pub(crate) fn new(
        id: String,
        name: String,
        key_path: Option<KeyPath>,
        generator: Option<KeyGenerator>,
        database: String,
        catalog: Arc<Catalog>,
    ) -> Self {
        Self {
            records: RecordStore::new_empty(id.clone(), Arc::clone(&catalog)),
            id,
            key_path,
            database,
            catalog,
            meta: Mutex::new(StoreMeta {
                name,
                deleted: false,
            }),
            generator: Mutex::new(generator),
            indexes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Recreates a persisted store together with its indexes.
    pub(crate) fn from_entry(
        entry: StoreEntry,
        indexes: Vec<Index>,
        max_generated_key: u64,
        database: String,
        catalog: Arc<Catalog>,
    ) -> Self {
        let generator = entry
            .auto_increment
            .then(|| KeyGenerator::with_current(entry.generator, max_generated_key));
        let store = Self {
            records: RecordStore::new(entry.id.clone(), Arc::clone(&catalog)),
            id: entry.id,
            key_path: entry.key_path,
            database,
            catalog,
            meta: Mutex::new(StoreMeta {
                name: entry.name,
                deleted: false,
            }),
            generator: Mutex::new(generator),
            indexes: Mutex::new(BTreeMap::new()),
        };
        for index in indexes {
            store.insert_index(Arc::new(index));
        }
        store
    }

    pub(crate) fn entry(&self) -> StoreEntry {
        let generator = *self.generator.lock();
        StoreEntry {
            id: self.id.clone(),
            name: self.name(),
            key_path: self.key_path.clone(),
            auto_increment: generator.is_some(),
            generator: generator.map_or(0.0, |g| g.current()),
        }
    }

    pub(crate) async fn persist_entry(&self) -> CoreResult<()> {
        self.catalog
            .write_json(&catalog::store_entry(&self.database, &self.id), &self.entry())
            .await
    }

    pub(crate) async fn persist_index_list(&self) -> CoreResult<()> {
        let ids: Vec<String> = self.indexes().iter().map(|index| index.id.clone()).collect();
        self.catalog
            .write_json(&catalog::index_list(&self.id), &ids)
            .await
    }

    pub(crate) fn name(&self) -> String {
        self.meta.lock().name.clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        self.meta.lock().name = name;
    }

    pub(crate) fn auto_increment(&self) -> bool {
        self.generator.lock().is_some()
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.meta.lock().deleted
    }

    /// Marks the store, and with it every index, deleted or restored.
    pub(crate) fn set_deleted(&self, deleted: bool) {
        self.meta.lock().deleted = deleted;
        for index in self.indexes() {
            index.set_deleted(deleted);
        }
    }

    pub(crate) fn index(&self, name: &str) -> Option<Arc<Index>> {
        self.indexes.lock().get(name).cloned()
    }

    /// Indexes ordered by name.
    pub(crate) fn indexes(&self) -> Vec<Arc<Index>> {
        self.indexes.lock().values().cloned().collect()
    }

    pub(crate) fn index_names(&self) -> Vec<String> {
        self.indexes.lock().keys().cloned().collect()
    }

    pub(crate) fn insert_index(&self, index: Arc<Index>) {
        self.indexes.lock().insert(index.name(), index);
    }

    pub(crate) fn remove_index(&self, name: &str) -> Option<Arc<Index>> {
        self.indexes.lock().remove(name)
    }

    pub(crate) fn rename_index(&self, from: &str, to: &str) {
        let mut indexes = self.indexes.lock();
        if let Some(index) = indexes.remove(from) {
            index.set_name(to.to_string());
            indexes.insert(to.to_string(), index);
        }
    }

    fn initialized_indexes(&self) -> Vec<Arc<Index>> {
        self.indexes()
            .into_iter()
            .filter(|index| index.is_initialized())
            .collect()
    }

    /// Records a generator change: persists it and, inside a transaction,
    /// registers its restoration.
    async fn generator_moved(
        self: &Arc<Self>,
        previous: KeyGenerator,
        rollback: Option<&SharedRollback>,
    ) -> CoreResult<()> {
        if let Some(rollback) = rollback {
            let store = Arc::clone(self);
            rollback.push_transactional(move || async move {
                *store.generator.lock() = Some(previous);
                store.persist_entry().await
            });
        }
        self.persist_entry().await
    }

    async fn generate_key(self: &Arc<Self>, value: &mut Value, rollback: Option<&SharedRollback>) -> CoreResult<Key> {
        let (previous, next) = {
            let mut generator = self.generator.lock();
            let generator = generator
                .as_mut()
                .ok_or_else(|| CoreError::data("no key was given and the store has no key generator"))?;
            let previous = *generator;
            (previous, generator.next_key()?)
        };
        self.generator_moved(previous, rollback).await?;
        let key = Key::Number(next);
        if let Some(key_path) = &self.key_path {
            key_path.inject(value, &key)?;
        }
        Ok(key)
    }

    async fn observe_explicit_key(self: &Arc<Self>, key: &Key, rollback: Option<&SharedRollback>) -> CoreResult<()> {
        let Key::Number(n) = key else {
            return Ok(());
        };
        let moved = {
            let mut generator = self.generator.lock();
            generator.as_mut().and_then(|generator| {
                let previous = *generator;
                generator.set_if_larger(*n).then_some(previous)
            })
        };
        match moved {
            Some(previous) => self.generator_moved(previous, rollback).await,
            None => Ok(()),
        }
    }

    /// Inserts or replaces a record and its index entries.
    ///
    /// `key` is the already validated primary key, or `None` to use the key
    /// generator. Uniqueness across every initialised index is checked
    /// before anything is written, so a rejected write changes nothing.
    /// Within a transaction, `rollback` receives the compensating steps.
    pub(crate) async fn store_record(
        self: &Arc<Self>,
        mut value: Value,
        key: Option<Key>,
        no_overwrite: bool,
        rollback: Option<&SharedRollback>,
    ) -> CoreResult<Key> {
        let key = match key {
            Some(key) => {
                self.observe_explicit_key(&key, rollback).await?;
                key
            }
            None => self.generate_key(&mut value, rollback).await?,
        };

        let exact = Query::Key(key.clone());
        let exists = self.records.get(&exact).await?.is_some();
        if exists && no_overwrite {
            return Err(CoreError::constraint(format!(
                "a record with key {key} already exists in {:?}",
                self.name()
            )));
        }
        let indexes = self.initialized_indexes();
        for index in &indexes {
            index.check_unique(&value, &key).await?;
        }
        if exists {
            self.delete_record(&exact, rollback).await?;
        }

        self.records
            .add(Record {
                key: key.clone(),
                value: value.clone(),
            })
            .await?;
        if let Some(rollback) = rollback {
            let store = Arc::clone(self);
            let added = key.clone();
            rollback.push_transactional(move || async move {
                store.delete_record(&Query::Key(added), None).await.map(drop)
            });
        }
        for index in &indexes {
            index.store_record(&value, &key).await?;
        }
        Ok(key)
    }

    /// Deletes the records matching `query` and their index entries.
    pub(crate) async fn delete_record(
        self: &Arc<Self>,
        query: &Query,
        rollback: Option<&SharedRollback>,
    ) -> CoreResult<Vec<Record<Value>>> {
        let removed = self.records.delete(query).await?;
        if removed.is_empty() {
            return Ok(removed);
        }
        for index in self.indexes() {
            index.records.delete_by_value(query).await?;
        }
        if let Some(rollback) = rollback {
            self.push_reinsert(rollback, removed.clone());
        }
        Ok(removed)
    }

    /// Deletes every record and index entry.
    pub(crate) async fn clear(self: &Arc<Self>, rollback: Option<&SharedRollback>) -> CoreResult<()> {
        let removed = self.records.clear().await?;
        for index in self.indexes() {
            index.records.clear().await?;
        }
        if let Some(rollback) = rollback {
            self.push_reinsert(rollback, removed);
        }
        Ok(())
    }

    fn push_reinsert(self: &Arc<Self>, rollback: &SharedRollback, records: Vec<Record<Value>>) {
        let store = Arc::clone(self);
        rollback.push_transactional(move || async move {
            for record in records {
                store
                    .store_record(record.value, Some(record.key), true, None)
                    .await?;
            }
            Ok(())
        });
    }

    pub(crate) async fn get_value(&self, query: &Query) -> CoreResult<Option<Value>> {
        Ok(self.records.get(query).await?.map(|record| record.value))
    }

    pub(crate) async fn get_key(&self, query: &Query) -> CoreResult<Option<Key>> {
        Ok(self.records.get(query).await?.map(|record| record.key))
    }

    pub(crate) async fn get_all_values(&self, query: Query, count: Option<u32>) -> CoreResult<Vec<Value>> {
        Ok(self
            .records
            .collect(query, count)
            .await?
            .into_iter()
            .map(|record| record.value)
            .collect())
    }

    pub(crate) async fn get_all_keys(&self, query: Query, count: Option<u32>) -> CoreResult<Vec<Key>> {
        Ok(self
            .records
            .collect(query, count)
            .await?
            .into_iter()
            .map(|record| record.key)
            .collect())
    }

    pub(crate) async fn count(&self, query: &Query) -> CoreResult<u64> {
        self.records.count(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_GENERATED_KEY;
    use shelfdb_codec::SerialCodec;
    use shelfdb_storage::InMemoryBackend;

    fn catalog() -> Arc<Catalog> {
        Arc::new(Catalog::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(SerialCodec),
            "t",
        ))
    }

    fn store(key_path: Option<&str>, auto_increment: bool) -> Arc<ObjectStore> {
        Arc::new(ObjectStore::new(
            "s".into(),
            "s".into(),
            key_path.map(KeyPath::from),
            auto_increment.then(|| KeyGenerator::new(DEFAULT_MAX_GENERATED_KEY)),
            "db".into(),
            catalog(),
        ))
    }

    async fn with_unique_index(store: &Arc<ObjectStore>) -> Arc<Index> {
        let index = Arc::new(Index::new(
            "ix".into(),
            "by_n".into(),
            KeyPath::from("n"),
            false,
            true,
            catalog(),
        ));
        index.initialize(store).await.unwrap();
        store.insert_index(Arc::clone(&index));
        index
    }

    fn n(value: &str) -> Value {
        Value::object([("n", Value::from(value))])
    }

    #[tokio::test]
    async fn generated_keys_are_injected() {
        let store = store(Some("id"), true);
        let key = store
            .store_record(Value::empty_object(), None, true, None)
            .await
            .unwrap();
        assert_eq!(key, Key::from(1));
        let value = store.get_value(&Query::from(1)).await.unwrap().unwrap();
        assert_eq!(value.get("id"), Some(&Value::from(1)));
    }

    #[tokio::test]
    async fn explicit_numeric_keys_bump_the_generator() {
        let store = store(None, true);
        store
            .store_record(Value::Null, Some(Key::from(10)), true, None)
            .await
            .unwrap();
        let key = store.store_record(Value::Null, None, true, None).await.unwrap();
        assert_eq!(key, Key::from(11));
        assert_eq!(store.entry().generator, 11.0);
    }

    #[tokio::test]
    async fn no_overwrite_rejects_existing_keys() {
        let store = store(None, false);
        store
            .store_record(Value::from("a"), Some(Key::from(1)), true, None)
            .await
            .unwrap();
        let err = store
            .store_record(Value::from("b"), Some(Key::from(1)), true, None)
            .await
            .unwrap_err();
        assert_eq!(err.name(), "ConstraintError");
        assert_eq!(
            store.get_value(&Query::from(1)).await.unwrap(),
            Some(Value::from("a"))
        );
    }

    #[tokio::test]
    async fn overwrite_replaces_index_entries() {
        let store = store(None, false);
        let index = with_unique_index(&store).await;
        store.store_record(n("a"), Some(Key::from(1)), false, None).await.unwrap();
        store.store_record(n("b"), Some(Key::from(1)), false, None).await.unwrap();
        assert_eq!(index.get_key(&Query::from("a")).await.unwrap(), None);
        assert_eq!(index.get_key(&Query::from("b")).await.unwrap(), Some(Key::from(1)));
    }

    #[tokio::test]
    async fn unique_violation_leaves_the_store_unchanged() {
        let store = store(None, false);
        with_unique_index(&store).await;
        store.store_record(n("a"), Some(Key::from(1)), false, None).await.unwrap();
        store.store_record(n("x"), Some(Key::from(2)), false, None).await.unwrap();
        let err = store
            .store_record(n("a"), Some(Key::from(2)), false, None)
            .await
            .unwrap_err();
        assert_eq!(err.name(), "ConstraintError");
        assert_eq!(
            store.get_value(&Query::from(2)).await.unwrap(),
            Some(n("x"))
        );
    }

    #[tokio::test]
    async fn delete_removes_index_entries() {
        let store = store(None, false);
        let index = with_unique_index(&store).await;
        store.store_record(n("a"), Some(Key::from(1)), false, None).await.unwrap();
        store.delete_record(&Query::from(1), None).await.unwrap();
        assert_eq!(index.count(&Query::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rollback_restores_deleted_records() {
        let store = store(None, false);
        let index = with_unique_index(&store).await;
        store.store_record(n("a"), Some(Key::from(1)), false, None).await.unwrap();
        let rollback = SharedRollback::new();
        store.delete_record(&Query::All, Some(&rollback)).await.unwrap();
        store.store_record(n("b"), Some(Key::from(2)), false, Some(&rollback)).await.unwrap();
        rollback.unwind_transactional().await;
        assert_eq!(store.get_all_keys(Query::All, None).await.unwrap(), vec![Key::from(1)]);
        assert_eq!(index.get_key(&Query::from("a")).await.unwrap(), Some(Key::from(1)));
    }

    #[tokio::test]
    async fn generator_rollback_restores_its_value() {
        let store = store(None, true);
        let rollback = SharedRollback::new();
        store.store_record(Value::Null, None, true, Some(&rollback)).await.unwrap();
        rollback.unwind_transactional().await;
        assert_eq!(store.count(&Query::All).await.unwrap(), 0);
        assert_eq!(store.store_record(Value::Null, None, true, None).await.unwrap(), Key::from(1));
    }
}

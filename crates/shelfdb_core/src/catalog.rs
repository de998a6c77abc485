//! Persisted catalog: where databases, stores and indexes live in the
//! storage backend.
//!
//! Every key is namespaced under [`Config::storage_prefix`]:
//!
//! | Key | Contents |
//! |-----|----------|
//! | `databases/keys` | JSON list of database names |
//! | `databases/entry/{name}` | [`DatabaseEntry`] |
//! | `db/{name}/stores/keys` | JSON list of store ids |
//! | `db/{name}/stores/entry/{id}` | [`StoreEntry`] |
//! | `store/{id}/indexes/keys` | JSON list of index ids |
//! | `store/{id}/indexes/entry/{id}` | [`IndexEntry`] |
//! | `records/{id}/keys` | encoded key list of a record store |
//! | `records/{id}/slot/{n}` | one encoded record payload |
//!
//! Store and index ids are UUIDs, so renaming never moves data.
//!
//! [`Config::storage_prefix`]: crate::Config::storage_prefix

use crate::error::CoreResult;
use crate::key_path::KeyPath;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shelfdb_codec::{Codec, Value};
use shelfdb_storage::StorageBackend;
use std::sync::Arc;

/// Metadata of one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseEntry {
    /// Database name.
    pub name: String,
    /// Current schema version.
    pub version: u64,
}

/// Metadata of one object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEntry {
    /// Stable store id.
    pub id: String,
    /// Current name.
    pub name: String,
    /// Key path, if keys are derived from values.
    pub key_path: Option<KeyPath>,
    /// Whether the store has a key generator.
    pub auto_increment: bool,
    /// Last value produced by the key generator.
    #[serde(default)]
    pub generator: f64,
}

/// Metadata of one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Stable index id.
    pub id: String,
    /// Current name.
    pub name: String,
    /// Key path deriving index keys from store values.
    pub key_path: KeyPath,
    /// Whether array keys fan out into one entry per element.
    pub multi_entry: bool,
    /// Whether index keys must be unique.
    pub unique: bool,
}

/// Typed access to the storage backend under the configured prefix.
pub(crate) struct Catalog {
    backend: Arc<dyn StorageBackend>,
    codec: Arc<dyn Codec>,
    prefix: String,
}

impl Catalog {
    pub(crate) fn new(backend: Arc<dyn StorageBackend>, codec: Arc<dyn Codec>, prefix: &str) -> Self {
        Self {
            backend,
            codec,
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}/{}", self.prefix, key)
    }

    pub(crate) async fn read_json<T: DeserializeOwned>(&self, key: &str) -> CoreResult<Option<T>> {
        match self.backend.get(&self.full_key(key)).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn write_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> CoreResult<()> {
        let text = serde_json::to_string(value)?;
        self.backend.set(&self.full_key(key), text).await?;
        Ok(())
    }

    pub(crate) async fn read_value(&self, key: &str) -> CoreResult<Option<Value>> {
        match self.backend.get(&self.full_key(key)).await? {
            Some(text) => Ok(Some(self.codec.decode(&text)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn write_value(&self, key: &str, value: &Value) -> CoreResult<()> {
        let text = self.codec.encode(value)?;
        self.backend.set(&self.full_key(key), text).await?;
        Ok(())
    }

    pub(crate) async fn remove(&self, key: &str) -> CoreResult<()> {
        self.backend.remove(&self.full_key(key)).await?;
        Ok(())
    }

    pub(crate) async fn database_names(&self) -> CoreResult<Vec<String>> {
        Ok(self.read_json(DATABASE_LIST).await?.unwrap_or_default())
    }

    pub(crate) async fn database_entry(&self, name: &str) -> CoreResult<Option<DatabaseEntry>> {
        self.read_json(&database_entry(name)).await
    }

    pub(crate) async fn store_entries(&self, database: &str) -> CoreResult<Vec<StoreEntry>> {
        let ids: Vec<String> = self
            .read_json(&store_list(database))
            .await?
            .unwrap_or_default();
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.read_json(&store_entry(database, &id)).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub(crate) async fn index_entries(&self, store_id: &str) -> CoreResult<Vec<IndexEntry>> {
        let ids: Vec<String> = self
            .read_json(&index_list(store_id))
            .await?
            .unwrap_or_default();
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.read_json(&index_entry(store_id, &id)).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

pub(crate) const DATABASE_LIST: &str = "databases/keys";

pub(crate) fn database_entry(name: &str) -> String {
    format!("databases/entry/{name}")
}

pub(crate) fn store_list(database: &str) -> String {
    format!("db/{database}/stores/keys")
}

pub(crate) fn store_entry(database: &str, store_id: &str) -> String {
    format!("db/{database}/stores/entry/{store_id}")
}

pub(crate) fn index_list(store_id: &str) -> String {
    format!("store/{store_id}/indexes/keys")
}

pub(crate) fn index_entry(store_id: &str, index_id: &str) -> String {
    format!("store/{store_id}/indexes/entry/{index_id}")
}

pub(crate) fn record_keys(record_store_id: &str) -> String {
    format!("records/{record_store_id}/keys")
}

pub(crate) fn record_slot(record_store_id: &str, slot: u64) -> String {
    format!("records/{record_store_id}/slot/{slot}")
}

/// Generates a fresh store or index id.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfdb_codec::SerialCodec;
    use shelfdb_storage::InMemoryBackend;

    fn catalog(backend: Arc<InMemoryBackend>) -> Catalog {
        Catalog::new(backend, Arc::new(SerialCodec), "test/")
    }

    #[tokio::test]
    async fn keys_are_prefixed() {
        let backend = Arc::new(InMemoryBackend::new());
        let catalog = catalog(Arc::clone(&backend));
        catalog
            .write_json(DATABASE_LIST, &vec!["db".to_string()])
            .await
            .unwrap();
        assert_eq!(backend.keys(), vec!["test/databases/keys".to_string()]);
        assert_eq!(catalog.database_names().await.unwrap(), vec!["db".to_string()]);
    }

    #[tokio::test]
    async fn missing_lists_are_empty() {
        let catalog = catalog(Arc::new(InMemoryBackend::new()));
        assert!(catalog.database_names().await.unwrap().is_empty());
        assert!(catalog.store_entries("db").await.unwrap().is_empty());
        assert!(catalog.database_entry("db").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_entries_follow_the_id_list() {
        let catalog = catalog(Arc::new(InMemoryBackend::new()));
        let entry = StoreEntry {
            id: new_id(),
            name: "s".into(),
            key_path: Some(KeyPath::from("id")),
            auto_increment: false,
            generator: 0.0,
        };
        catalog
            .write_json(&store_entry("db", &entry.id), &entry)
            .await
            .unwrap();
        catalog
            .write_json(&store_list("db"), &vec![entry.id.clone()])
            .await
            .unwrap();
        assert_eq!(catalog.store_entries("db").await.unwrap(), vec![entry]);
    }

    #[tokio::test]
    async fn values_go_through_the_codec() {
        let catalog = catalog(Arc::new(InMemoryBackend::new()));
        let value = Value::Date(1.0);
        catalog.write_value(&record_slot("r", 1), &value).await.unwrap();
        assert_eq!(catalog.read_value(&record_slot("r", 1)).await.unwrap(), Some(value));
    }
}

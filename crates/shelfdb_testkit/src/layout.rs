//! Persisted layout verification.
//!
//! Classifies raw backend keys against the catalog layout, so tests can
//! assert that nothing is written outside it and that deletes and aborted
//! upgrades leave no orphans behind.

/// One recognised backend key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutKey {
    /// `databases/keys`
    DatabaseList,
    /// `databases/entry/{name}`
    DatabaseEntry(String),
    /// `db/{name}/stores/keys`
    StoreList(String),
    /// `db/{name}/stores/entry/{store-id}`
    StoreEntry(String, String),
    /// `store/{store-id}/indexes/keys`
    IndexList(String),
    /// `store/{store-id}/indexes/entry/{index-id}`
    IndexEntry(String, String),
    /// `records/{id}/keys`
    RecordKeys(String),
    /// `records/{id}/slot/{n}`
    RecordSlot(String, u64),
}

/// Classifies `key`, which must start with `prefix`. Returns `None` for
/// keys outside the layout.
pub fn classify(prefix: &str, key: &str) -> Option<LayoutKey> {
    let rest = key.strip_prefix(prefix.trim_end_matches('/'))?.strip_prefix('/')?;
    let parts: Vec<&str> = rest.split('/').collect();
    let key = match parts.as_slice() {
        ["databases", "keys"] => LayoutKey::DatabaseList,
        ["databases", "entry", name] => LayoutKey::DatabaseEntry((*name).to_string()),
        ["db", name, "stores", "keys"] => LayoutKey::StoreList((*name).to_string()),
        ["db", name, "stores", "entry", id] => LayoutKey::StoreEntry((*name).to_string(), (*id).to_string()),
        ["store", id, "indexes", "keys"] => LayoutKey::IndexList((*id).to_string()),
        ["store", store, "indexes", "entry", id] => {
            LayoutKey::IndexEntry((*store).to_string(), (*id).to_string())
        }
        ["records", id, "keys"] => LayoutKey::RecordKeys((*id).to_string()),
        ["records", id, "slot", slot] => LayoutKey::RecordSlot((*id).to_string(), slot.parse().ok()?),
        _ => return None,
    };
    Some(key)
}

/// Classifies every key, panicking on the first one outside the layout.
pub fn assert_layout(prefix: &str, keys: &[String]) -> Vec<LayoutKey> {
    keys.iter()
        .map(|key| classify(prefix, key).unwrap_or_else(|| panic!("Unexpected backend key: {key}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{object, open_with_stores, put_all, TestFactory};
    use shelfdb_codec::Value;
    use shelfdb_core::{IndexOptions, Key, ObjectStoreOptions};

    const PREFIX: &str = "shelfdb/v1";

    #[test]
    fn test_classify() {
        assert_eq!(classify(PREFIX, "shelfdb/v1/databases/keys"), Some(LayoutKey::DatabaseList));
        assert_eq!(
            classify(PREFIX, "shelfdb/v1/records/abc/slot/7"),
            Some(LayoutKey::RecordSlot("abc".into(), 7))
        );
        assert_eq!(classify(PREFIX, "shelfdb/v1/records/abc/slot/x"), None);
        assert_eq!(classify(PREFIX, "other/databases/keys"), None);
    }

    #[tokio::test]
    async fn test_populated_database_stays_inside_layout() {
        let test_factory = TestFactory::memory();
        let connection = test_factory
            .open("books", Some(1), |upgrade| async move {
                let store = upgrade
                    .transaction
                    .create_object_store("s", ObjectStoreOptions::key_path("id"))?;
                store.create_index("by_tag", "tags", IndexOptions::multi_entry())?;
                Ok(())
            })
            .await
            .unwrap();
        put_all(
            &connection,
            "s",
            vec![(
                None,
                object([
                    ("id", Value::from(1)),
                    ("tags", Value::Array(vec![Value::from("a"), Value::from("b")])),
                ]),
            )],
        )
        .await;

        let layout = assert_layout(PREFIX, &test_factory.backend_keys().unwrap());
        let count = |wanted: fn(&LayoutKey) -> bool| layout.iter().filter(|key| wanted(key)).count();
        assert_eq!(count(|key| matches!(key, LayoutKey::StoreEntry(..))), 1);
        assert_eq!(count(|key| matches!(key, LayoutKey::IndexEntry(..))), 1);
        // One store record list and one index record list.
        assert_eq!(count(|key| matches!(key, LayoutKey::RecordKeys(_))), 2);
        // One record slot in the store, two in the multi-entry index.
        assert_eq!(count(|key| matches!(key, LayoutKey::RecordSlot(..))), 3);
    }

    #[tokio::test]
    async fn test_deleted_database_leaves_only_the_list() {
        let test_factory = TestFactory::memory();
        let connection = open_with_stores(&test_factory, "gone", &[("s", ObjectStoreOptions::default())]).await;
        put_all(&connection, "s", vec![(Some(Key::from(1)), Value::from(1))]).await;
        connection.close();

        assert_eq!(test_factory.delete_database("gone").await.unwrap(), 1);
        let layout = assert_layout(PREFIX, &test_factory.backend_keys().unwrap());
        assert_eq!(layout, vec![LayoutKey::DatabaseList]);
    }

    #[tokio::test]
    async fn test_aborted_creation_leaves_only_the_list() {
        let test_factory = TestFactory::memory();
        let result = test_factory
            .open("never", Some(1), |upgrade| async move {
                let store = upgrade
                    .transaction
                    .create_object_store("s", ObjectStoreOptions::default())?;
                store.put(Value::from(1), Some(Key::from(1)))?.await?;
                upgrade.transaction.abort()
            })
            .await;
        assert!(result.is_err());
        let layout = assert_layout(PREFIX, &test_factory.backend_keys().unwrap());
        assert_eq!(layout, vec![LayoutKey::DatabaseList]);
    }
}

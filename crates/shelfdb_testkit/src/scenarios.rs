//! End-to-end engine scenarios.
//!
//! Each function drives one complete use case through the public API and
//! asserts on the observable result, so the same checks can run against
//! every backend.

use crate::fixtures::{object, open_with_stores, put_all, read_all};
use shelfdb_codec::Value;
use shelfdb_core::{
    Connection, CoreError, CursorDirection, Factory, IndexOptions, Key, KeyRange, ObjectStoreOptions, Query,
    TransactionMode,
};

/// Generated keys count up from 1 and `get` finds the stored record.
pub async fn generated_keys(factory: &Factory) {
    let connection = open_with_stores(factory, "generated", &[("s", ObjectStoreOptions::default().auto_increment())]).await;
    let txn = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .expect("Failed to start transaction");
    let store = txn.object_store("s").expect("Failed to open store");
    let first = store.add(object([("v", Value::from(1))]), None).expect("Failed to queue add");
    let second = store.add(object([("v", Value::from(2))]), None).expect("Failed to queue add");
    let fetched = store.get(1).expect("Failed to queue get");

    assert_eq!(first.await.expect("First add failed"), Key::from(1));
    assert_eq!(second.await.expect("Second add failed"), Key::from(2));
    assert_eq!(fetched.await.expect("Get failed"), Some(object([("v", Value::from(1))])));
    assert!(txn.done().await.is_committed());
}

/// A unique index rejects a second record with the same index key and
/// leaves the store as it was.
pub async fn unique_index_rejects_duplicates(factory: &Factory) {
    let connection = factory
        .open("unique", Some(1), |upgrade| async move {
            let store = upgrade
                .transaction
                .create_object_store("s", ObjectStoreOptions::default())?;
            store.create_index("by_n", "n", IndexOptions::unique())?;
            Ok(())
        })
        .await
        .expect("Failed to open database");

    let txn = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .expect("Failed to start transaction");
    let store = txn.object_store("s").expect("Failed to open store");
    let kept = store
        .add(object([("n", Value::from("a"))]), Some(Key::from(1)))
        .expect("Failed to queue add");
    let rejected = store
        .add(object([("n", Value::from("a"))]), Some(Key::from(2)))
        .expect("Failed to queue add")
        .prevent_abort();

    assert_eq!(kept.await.expect("First add failed"), Key::from(1));
    let err = rejected.await.expect_err("Duplicate index key should be rejected");
    assert!(matches!(err, CoreError::ConstraintError(_)), "unexpected error: {err}");
    assert!(txn.done().await.is_committed());

    let records = read_all(&connection, "s").await;
    assert_eq!(records, vec![(Key::from(1), object([("n", Value::from("a"))]))]);

    // Without prevent_abort the failure takes the whole transaction down.
    let txn = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .expect("Failed to start transaction");
    let store = txn.object_store("s").expect("Failed to open store");
    let other = store
        .put(object([("n", Value::from("b"))]), Some(Key::from(3)))
        .expect("Failed to queue put");
    let rejected = store
        .add(object([("n", Value::from("a"))]), Some(Key::from(4)))
        .expect("Failed to queue add");
    assert!(other.await.is_ok());
    assert!(rejected.await.is_err());
    let outcome = txn.done().await;
    assert!(!outcome.is_committed());
    assert_eq!(read_all(&connection, "s").await.len(), 1);
}

/// A reverse cursor over a bounded range visits the bounds inclusively,
/// highest first.
pub async fn reverse_cursor_over_range(factory: &Factory) {
    let connection = open_with_stores(factory, "cursor", &[("s", ObjectStoreOptions::default())]).await;
    let records = (1..=5)
        .map(|n| (Some(Key::from(n)), object([("n", Value::from(n))])))
        .collect();
    put_all(&connection, "s", records).await;

    let txn = connection
        .transaction(&["s"], TransactionMode::ReadOnly)
        .expect("Failed to start transaction");
    let store = txn.object_store("s").expect("Failed to open store");
    let range = KeyRange::bound(Key::from(2), Key::from(4), false, false).expect("Valid range");
    let mut cursor = store
        .open_cursor(range, CursorDirection::Prev)
        .expect("Failed to open cursor")
        .await
        .expect("Cursor request failed");

    let mut seen = Vec::new();
    while let Some(current) = cursor {
        seen.push(current.key().expect("Cursor should have a key"));
        cursor = current
            .continue_(None)
            .expect("Failed to continue")
            .await
            .expect("Continue failed");
    }
    assert_eq!(seen, vec![Key::from(4), Key::from(3), Key::from(2)]);
    assert!(txn.done().await.is_committed());
}

/// Aborting a transaction restores a record it deleted, whether or not the
/// delete had already run.
pub async fn abort_restores_deleted_record(factory: &Factory) {
    let connection = open_with_stores(factory, "abort", &[("s", ObjectStoreOptions::default())]).await;
    let original = object([("n", Value::from(3))]);
    put_all(&connection, "s", vec![(Some(Key::from(3)), original.clone())]).await;

    // Abort before the delete is drained.
    let txn = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .expect("Failed to start transaction");
    let delete = txn
        .object_store("s")
        .expect("Failed to open store")
        .delete(3)
        .expect("Failed to queue delete");
    txn.abort().expect("Failed to abort");
    assert!(matches!(delete.await, Err(CoreError::AbortError(_))));
    assert!(!txn.done().await.is_committed());

    // Abort after the delete has run.
    let txn = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .expect("Failed to start transaction");
    let store = txn.object_store("s").expect("Failed to open store");
    store.delete(3).expect("Failed to queue delete").await.expect("Delete failed");
    assert_eq!(store.get(3).expect("Failed to queue get").await.expect("Get failed"), None);
    txn.abort().expect("Failed to abort");
    assert!(!txn.done().await.is_committed());

    let txn = connection
        .transaction(&["s"], TransactionMode::ReadOnly)
        .expect("Failed to start transaction");
    let fetched = txn
        .object_store("s")
        .expect("Failed to open store")
        .get(3)
        .expect("Failed to queue get")
        .await
        .expect("Get failed");
    assert_eq!(fetched, Some(original));
}

/// A uniqueness violation discovered while an upgrade runs aborts the
/// upgrade, and the store it created does not survive.
pub async fn failed_upgrade_drops_new_store(factory: &Factory) {
    let err = factory
        .open("upgrade", Some(1), |upgrade| async move {
            let store = upgrade
                .transaction
                .create_object_store("s", ObjectStoreOptions::default())?;
            store.create_index("by_n", "n", IndexOptions::unique())?;
            let first = store.add(object([("n", Value::from(1))]), Some(Key::from(1)))?;
            let second = store.add(object([("n", Value::from(1))]), Some(Key::from(2)))?;
            first.await?;
            second.await?;
            Ok(())
        })
        .await
        .expect_err("The upgrade should abort");
    assert!(matches!(err, CoreError::AbortError(_)), "unexpected error: {err}");

    let connection = factory
        .open("upgrade", None, |_| async { Ok(()) })
        .await
        .expect("Failed to reopen database");
    assert!(connection.object_store_names().is_empty());
    let err = connection
        .transaction(&["s"], TransactionMode::ReadOnly)
        .expect_err("The store should not exist");
    assert!(matches!(err, CoreError::NotFoundError(_)));
}

/// Transactions queued together run one after the other, so a reader
/// created after a writer sees all of the writer's records or none.
pub async fn transactions_run_serially(factory: &Factory) {
    let connection = open_with_stores(factory, "serial", &[("s", ObjectStoreOptions::default())]).await;
    let writer = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .expect("Failed to start transaction");
    let reader = connection
        .transaction(&["s"], TransactionMode::ReadOnly)
        .expect("Failed to start transaction");

    let count = reader
        .object_store("s")
        .expect("Failed to open store")
        .count(Query::All)
        .expect("Failed to queue count");
    let store = writer.object_store("s").expect("Failed to open store");
    let puts: Vec<_> = (1..=10)
        .map(|n| store.put(Value::from(n), Some(Key::from(n))).expect("Failed to queue put"))
        .collect();

    assert_eq!(count.await.expect("Count failed"), 10);
    for put in puts {
        put.await.expect("Put failed");
    }
    assert!(writer.done().await.is_committed());
    assert!(reader.done().await.is_committed());
}

/// Opens `name` with store `s` holding keys 1 to 6, indexed by `group`:
/// `a` for 1 and 2, `b` for 3 to 5, `c` for 6.
async fn open_grouped(factory: &Factory, name: &str) -> Connection {
    let connection = factory
        .open(name, Some(1), |upgrade| async move {
            let store = upgrade
                .transaction
                .create_object_store("s", ObjectStoreOptions::default())?;
            store.create_index("by_group", "group", IndexOptions::default())?;
            Ok(())
        })
        .await
        .expect("Failed to open database");
    let records = [(1, "a"), (2, "a"), (3, "b"), (4, "b"), (5, "b"), (6, "c")]
        .into_iter()
        .map(|(n, group)| {
            (
                Some(Key::from(n)),
                object([("group", Value::from(group)), ("n", Value::from(n))]),
            )
        })
        .collect();
    put_all(&connection, "s", records).await;
    connection
}

/// A store cursor skips with `advance`, jumps with a target key, updates
/// and deletes the record under it, and refuses to move once exhausted.
pub async fn cursor_navigation_and_mutation(factory: &Factory) {
    let connection = open_grouped(factory, "navigate").await;
    let txn = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .expect("Failed to start transaction");
    let store = txn.object_store("s").expect("Failed to open store");

    let cursor = store
        .open_cursor(Query::All, CursorDirection::Next)
        .expect("Failed to open cursor")
        .await
        .expect("Cursor request failed")
        .expect("The store is not empty");
    assert_eq!(cursor.key(), Some(Key::from(1)));
    let err = cursor.advance(0).expect_err("Zero is not a valid count");
    assert!(matches!(err, CoreError::InvalidAccessError(_)));
    let err = cursor
        .continue_primary_key(Key::from(2), Key::from(2))
        .expect_err("Store cursors have no primary key position");
    assert!(matches!(err, CoreError::InvalidAccessError(_)));

    let cursor = cursor
        .advance(2)
        .expect("Failed to advance")
        .await
        .expect("Advance failed")
        .expect("Record 3 exists");
    assert_eq!(cursor.key(), Some(Key::from(3)));
    let key = cursor
        .update(object([("group", Value::from("c")), ("n", Value::from(30))]))
        .expect("Failed to queue update")
        .await
        .expect("Update failed");
    assert_eq!(key, Key::from(3));

    let cursor = cursor
        .continue_(None)
        .expect("Failed to continue")
        .await
        .expect("Continue failed")
        .expect("Record 4 exists");
    assert_eq!(cursor.key(), Some(Key::from(4)));
    cursor.delete().expect("Failed to queue delete").await.expect("Delete failed");
    let err = cursor
        .continue_(Some(Key::from(2)))
        .expect_err("Target behind the cursor");
    assert!(matches!(err, CoreError::DataError(_)));

    let cursor = cursor
        .continue_(Some(Key::from(6)))
        .expect("Failed to continue")
        .await
        .expect("Continue failed")
        .expect("Record 6 exists");
    assert_eq!(cursor.value(), Some(object([("group", Value::from("c")), ("n", Value::from(6))])));
    let exhausted = cursor
        .continue_(None)
        .expect("Failed to continue")
        .await
        .expect("Continue failed");
    assert!(exhausted.is_none());
    let err = cursor.continue_(None).expect_err("The cursor is exhausted");
    assert!(matches!(err, CoreError::InvalidStateError(_)));
    assert!(txn.done().await.is_committed());

    let keys: Vec<Key> = read_all(&connection, "s").await.into_iter().map(|(key, _)| key).collect();
    assert_eq!(keys, [1, 2, 3, 5, 6].map(Key::from).to_vec());
    let txn = connection
        .transaction(&["s"], TransactionMode::ReadOnly)
        .expect("Failed to start transaction");
    let by_group = txn
        .object_store("s")
        .expect("Failed to open store")
        .index("by_group")
        .expect("Failed to open index");
    let in_c = by_group
        .get_all_keys(Key::from("c"), None)
        .expect("Failed to queue read")
        .await
        .expect("Read failed");
    assert_eq!(in_c, vec![Key::from(3), Key::from(6)]);
    let in_b = by_group
        .get_all_keys(Key::from("b"), None)
        .expect("Failed to queue read")
        .await
        .expect("Read failed");
    assert_eq!(in_b, vec![Key::from(5)]);
}

/// Collects `(index key, primary key)` pairs from an index cursor.
async fn walk_index(connection: &Connection, direction: CursorDirection) -> Vec<(Key, Key)> {
    let txn = connection
        .transaction(&["s"], TransactionMode::ReadOnly)
        .expect("Failed to start transaction");
    let by_group = txn
        .object_store("s")
        .expect("Failed to open store")
        .index("by_group")
        .expect("Failed to open index");
    let mut cursor = by_group
        .open_key_cursor(Query::All, direction)
        .expect("Failed to open cursor")
        .await
        .expect("Cursor request failed");
    let mut seen = Vec::new();
    while let Some(current) = cursor {
        seen.push((
            current.key().expect("Cursor should have a key"),
            current.primary_key().expect("Cursor should have a primary key"),
        ));
        cursor = current
            .continue_(None)
            .expect("Failed to continue")
            .await
            .expect("Continue failed");
    }
    assert!(txn.done().await.is_committed());
    seen
}

/// Unique directions land on the lowest primary key of each index key, and
/// `continue_primary_key` jumps within an index key.
pub async fn index_cursor_directions(factory: &Factory) {
    let connection = open_grouped(factory, "directions").await;
    let pair = |group: &str, n: i32| (Key::from(group), Key::from(n));

    assert_eq!(
        walk_index(&connection, CursorDirection::NextUnique).await,
        vec![pair("a", 1), pair("b", 3), pair("c", 6)]
    );
    assert_eq!(
        walk_index(&connection, CursorDirection::PrevUnique).await,
        vec![pair("c", 6), pair("b", 3), pair("a", 1)]
    );
    assert_eq!(
        walk_index(&connection, CursorDirection::Prev).await,
        vec![pair("c", 6), pair("b", 5), pair("b", 4), pair("b", 3), pair("a", 2), pair("a", 1)]
    );

    let txn = connection
        .transaction(&["s"], TransactionMode::ReadOnly)
        .expect("Failed to start transaction");
    let by_group = txn
        .object_store("s")
        .expect("Failed to open store")
        .index("by_group")
        .expect("Failed to open index");
    let unique = by_group
        .open_cursor(Query::All, CursorDirection::NextUnique)
        .expect("Failed to open cursor");
    let cursor = by_group
        .open_cursor(Query::All, CursorDirection::Next)
        .expect("Failed to open cursor");
    let unique = unique.await.expect("Cursor request failed").expect("The index is not empty");
    let err = unique
        .continue_primary_key(Key::from("b"), Key::from(4))
        .expect_err("Unique directions cannot target a primary key");
    assert!(matches!(err, CoreError::InvalidAccessError(_)));

    let cursor = cursor.await.expect("Cursor request failed").expect("The index is not empty");
    let cursor = cursor
        .continue_primary_key(Key::from("b"), Key::from(4))
        .expect("Failed to continue")
        .await
        .expect("Continue failed")
        .expect("Entry (b, 4) exists");
    assert_eq!(cursor.key(), Some(Key::from("b")));
    assert_eq!(cursor.primary_key(), Some(Key::from(4)));
    assert_eq!(cursor.value(), Some(object([("group", Value::from("b")), ("n", Value::from(4))])));
    let err = cursor
        .continue_primary_key(Key::from("b"), Key::from(3))
        .expect_err("Target behind the cursor");
    assert!(matches!(err, CoreError::DataError(_)));
    assert!(txn.done().await.is_committed());
}

/// Store and index renames are undone by an aborted upgrade and kept by a
/// committed one; a deleted index is gone for good while the records stay.
pub async fn schema_renames_and_index_deletes(factory: &Factory) {
    let connection = open_grouped(factory, "renames").await;
    connection.close();

    let err = factory
        .open("renames", Some(2), |upgrade| async move {
            let store = upgrade.transaction.object_store("s")?;
            store.rename("t")?;
            store.index("by_group")?.rename("by_kind")?;
            store.count(Query::All)?.await?;
            upgrade.transaction.abort()
        })
        .await
        .expect_err("The upgrade should abort");
    assert!(matches!(err, CoreError::AbortError(_)), "unexpected error: {err}");
    let connection = factory
        .open("renames", None, |_| async { Ok(()) })
        .await
        .expect("Failed to reopen database");
    assert_eq!(connection.version(), 1);
    assert_eq!(connection.object_store_names(), vec!["s".to_string()]);
    let txn = connection
        .transaction(&["s"], TransactionMode::ReadOnly)
        .expect("Failed to start transaction");
    let store = txn.object_store("s").expect("Failed to open store");
    assert_eq!(store.index_names(), vec!["by_group".to_string()]);
    assert!(txn.done().await.is_committed());
    connection.close();

    let connection = factory
        .open("renames", Some(2), |upgrade| async move {
            let store = upgrade.transaction.object_store("s")?;
            store.rename("t")?;
            store.index("by_group")?.rename("by_kind")?;
            Ok(())
        })
        .await
        .expect("Failed to upgrade");
    assert_eq!(connection.object_store_names(), vec!["t".to_string()]);
    let txn = connection
        .transaction(&["t"], TransactionMode::ReadOnly)
        .expect("Failed to start transaction");
    let store = txn.object_store("t").expect("Failed to open store");
    assert_eq!(store.index_names(), vec!["by_kind".to_string()]);
    let count = store
        .index("by_kind")
        .expect("Failed to open index")
        .count(Key::from("b"))
        .expect("Failed to queue count")
        .await
        .expect("Count failed");
    assert_eq!(count, 3);
    assert!(txn.done().await.is_committed());
    connection.close();

    let connection = factory
        .open("renames", Some(3), |upgrade| async move {
            upgrade.transaction.object_store("t")?.delete_index("by_kind")
        })
        .await
        .expect("Failed to upgrade");
    let txn = connection
        .transaction(&["t"], TransactionMode::ReadOnly)
        .expect("Failed to start transaction");
    let store = txn.object_store("t").expect("Failed to open store");
    assert!(store.index_names().is_empty());
    let err = store.index("by_kind").expect_err("The index was deleted");
    assert!(matches!(err, CoreError::NotFoundError(_)));
    assert_eq!(
        store.count(Query::All).expect("Failed to queue count").await.expect("Count failed"),
        6
    );
}

/// An upgrade that aborts after its store deletion has been persisted
/// brings back the store, its records and its index entries.
pub async fn aborted_store_delete_restores_records(factory: &Factory) {
    let connection = open_grouped(factory, "restore").await;
    connection.close();

    let err = factory
        .open("restore", Some(2), |upgrade| async move {
            let scratch = upgrade
                .transaction
                .create_object_store("scratch", ObjectStoreOptions::default())?;
            upgrade.transaction.delete_object_store("s")?;
            // The deletion is persisted by the time this count resolves.
            scratch.count(Query::All)?.await?;
            upgrade.transaction.abort()
        })
        .await
        .expect_err("The upgrade should abort");
    assert!(matches!(err, CoreError::AbortError(_)), "unexpected error: {err}");

    let connection = factory
        .open("restore", None, |_| async { Ok(()) })
        .await
        .expect("Failed to reopen database");
    assert_eq!(connection.object_store_names(), vec!["s".to_string()]);
    assert_eq!(read_all(&connection, "s").await.len(), 6);
    assert_eq!(walk_index(&connection, CursorDirection::Next).await.len(), 6);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestFactory;

    macro_rules! scenario_tests {
        ($($name:ident => $scenario:ident),* $(,)?) => {
            mod memory {
                use super::*;
                $(
                    #[tokio::test]
                    async fn $name() {
                        $scenario(&TestFactory::memory()).await;
                    }
                )*
            }

            mod yielding {
                use super::*;
                $(
                    #[tokio::test]
                    async fn $name() {
                        $scenario(&TestFactory::yielding()).await;
                    }
                )*
            }

            mod file {
                use super::*;
                $(
                    #[tokio::test]
                    async fn $name() {
                        $scenario(&TestFactory::file()).await;
                    }
                )*
            }
        };
    }

    scenario_tests! {
        test_generated_keys => generated_keys,
        test_unique_index_rejects_duplicates => unique_index_rejects_duplicates,
        test_reverse_cursor_over_range => reverse_cursor_over_range,
        test_abort_restores_deleted_record => abort_restores_deleted_record,
        test_failed_upgrade_drops_new_store => failed_upgrade_drops_new_store,
        test_transactions_run_serially => transactions_run_serially,
        test_cursor_navigation_and_mutation => cursor_navigation_and_mutation,
        test_index_cursor_directions => index_cursor_directions,
        test_schema_renames_and_index_deletes => schema_renames_and_index_deletes,
        test_aborted_store_delete_restores_records => aborted_store_delete_restores_records,
    }
}

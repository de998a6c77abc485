//! Dump command implementation.

use super::{open_existing, CliError, CliResult};
use shelfdb_core::{Factory, Query, TransactionMode};
use std::io::Write;

/// Writes the records of `store` as JSON lines, `{"key": .., "value": ..}`,
/// in key order. `limit` caps the number of records.
pub async fn run(factory: &Factory, database: &str, store: &str, limit: Option<u32>) -> CliResult<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in lines(factory, database, store, limit).await? {
        // A closed pipe (e.g. `| head`) ends the dump quietly.
        if writeln!(out, "{line}").is_err() {
            break;
        }
    }
    Ok(())
}

/// Renders the dump as one JSON document per record.
pub async fn lines(factory: &Factory, database: &str, store: &str, limit: Option<u32>) -> CliResult<Vec<String>> {
    let connection = open_existing(factory, database).await?;
    if !connection.object_store_names().iter().any(|name| name == store) {
        connection.close();
        return Err(CliError::StoreNotFound {
            database: database.to_string(),
            store: store.to_string(),
        });
    }
    let txn = connection.transaction(&[store], TransactionMode::ReadOnly)?;
    let handle = txn.object_store(store)?;
    let keys = handle.get_all_keys(Query::All, limit)?;
    let values = handle.get_all(Query::All, limit)?;
    let (keys, values) = (keys.await?, values.await?);
    txn.done().await;
    connection.close();

    keys.into_iter()
        .zip(values)
        .map(|(key, value)| {
            let record = serde_json::json!({
                "key": key.to_value().to_json(),
                "value": value.to_json(),
            });
            Ok(serde_json::to_string(&record)?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::factory;
    use shelfdb_codec::Value;
    use shelfdb_core::{Key, ObjectStoreOptions};
    use tempfile::TempDir;

    async fn seeded(dir: &TempDir) -> Factory {
        let factory = factory(dir.path()).unwrap();
        let connection = factory
            .open("db", Some(1), |upgrade| async move {
                let store = upgrade
                    .transaction
                    .create_object_store("s", ObjectStoreOptions::default())?;
                for n in [3, 1, 2] {
                    let _ = store.put(Value::object([("n", Value::from(n))]), Some(Key::from(n)))?;
                }
                Ok(())
            })
            .await
            .unwrap();
        connection.close();
        factory
    }

    #[tokio::test]
    async fn test_dump_in_key_order_with_limit() {
        let dir = TempDir::new().unwrap();
        let factory = seeded(&dir).await;
        let lines = lines(&factory, "db", "s", Some(2)).await.unwrap();
        assert_eq!(
            lines,
            vec![
                r#"{"key":1.0,"value":{"n":1.0}}"#.to_string(),
                r#"{"key":2.0,"value":{"n":2.0}}"#.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_dump_unknown_store() {
        let dir = TempDir::new().unwrap();
        let factory = seeded(&dir).await;
        let err = lines(&factory, "db", "missing", None).await.unwrap_err();
        assert!(matches!(err, CliError::StoreNotFound { .. }));
    }
}

//! Inspect command implementation.

use super::{open_existing, CliResult, Format};
use serde::Serialize;
use shelfdb_core::{Factory, KeyPath, ObjectStoreHandle, Query, TransactionMode};

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database name.
    pub name: String,
    /// Current version.
    pub version: u64,
    /// Object stores, sorted by name.
    pub stores: Vec<StoreStats>,
}

/// Schema and size of one object store.
#[derive(Debug, Serialize)]
pub struct StoreStats {
    /// Store name.
    pub name: String,
    /// Key path, if keys are derived from values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    /// Whether keys are generated.
    pub auto_increment: bool,
    /// Number of records.
    pub record_count: u64,
    /// Indexes, sorted by name.
    pub indexes: Vec<IndexStats>,
}

/// Schema and size of one index.
#[derive(Debug, Serialize)]
pub struct IndexStats {
    /// Index name.
    pub name: String,
    /// Key path deriving index keys.
    pub key_path: String,
    /// Whether index keys are unique.
    pub unique: bool,
    /// Whether array keys fan out.
    pub multi_entry: bool,
    /// Number of index entries.
    pub entry_count: u64,
}

/// Runs the inspect command.
pub async fn run(factory: &Factory, name: &str, format: Format) -> CliResult<()> {
    let result = inspect(factory, name).await?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

/// Collects the schema and record counts of `name`.
pub async fn inspect(factory: &Factory, name: &str) -> CliResult<InspectResult> {
    let connection = open_existing(factory, name).await?;
    let store_names = connection.object_store_names();
    let mut stores = Vec::with_capacity(store_names.len());
    if !store_names.is_empty() {
        let scope: Vec<&str> = store_names.iter().map(String::as_str).collect();
        let txn = connection.transaction(&scope, TransactionMode::ReadOnly)?;
        for store_name in &store_names {
            stores.push(store_stats(&txn.object_store(store_name)?).await?);
        }
        txn.done().await;
    }
    let result = InspectResult {
        name: connection.name().to_string(),
        version: connection.version(),
        stores,
    };
    connection.close();
    Ok(result)
}

async fn store_stats(store: &ObjectStoreHandle) -> CliResult<StoreStats> {
    let mut indexes = Vec::new();
    for index_name in store.index_names() {
        let index = store.index(&index_name)?;
        indexes.push(IndexStats {
            name: index_name,
            key_path: describe(index.key_path()),
            unique: index.unique(),
            multi_entry: index.multi_entry(),
            entry_count: index.count(Query::All)?.await?,
        });
    }
    Ok(StoreStats {
        name: store.name(),
        key_path: store.key_path().map(describe),
        auto_increment: store.auto_increment(),
        record_count: store.count(Query::All)?.await?,
        indexes,
    })
}

fn describe(key_path: &KeyPath) -> String {
    match key_path {
        KeyPath::Single(path) => path.clone(),
        KeyPath::Sequence(paths) => format!("[{}]", paths.join(", ")),
    }
}

fn print_text_output(result: &InspectResult) {
    println!("Database: {} (version {})", result.name, result.version);
    if result.stores.is_empty() {
        println!("  No object stores.");
        return;
    }
    for store in &result.stores {
        println!();
        println!("Object store: {}", store.name);
        println!(
            "  Key path:       {}",
            store.key_path.as_deref().unwrap_or("(out-of-line)")
        );
        println!("  Auto increment: {}", store.auto_increment);
        println!("  Records:        {}", store.record_count);
        for index in &store.indexes {
            let mut flags = Vec::new();
            if index.unique {
                flags.push("unique");
            }
            if index.multi_entry {
                flags.push("multi-entry");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            println!(
                "  Index {} on {}{}: {} entries",
                index.name, index.key_path, flags, index.entry_count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{factory, CliError};
    use shelfdb_codec::Value;
    use shelfdb_core::{IndexOptions, ObjectStoreOptions};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_inspect_reports_schema_and_counts() {
        let dir = TempDir::new().unwrap();
        let factory = factory(dir.path()).unwrap();
        let connection = factory
            .open("library", Some(3), |upgrade| async move {
                let books = upgrade
                    .transaction
                    .create_object_store("books", ObjectStoreOptions::key_path("isbn"))?;
                books.create_index("by_tag", "tags", IndexOptions::multi_entry())?;
                upgrade
                    .transaction
                    .create_object_store("notes", ObjectStoreOptions::default().auto_increment())?;
                books
                    .put(
                        Value::object([
                            ("isbn", Value::from("1")),
                            ("tags", Value::Array(vec![Value::from("a"), Value::from("b")])),
                        ]),
                        None,
                    )?
                    .await?;
                Ok(())
            })
            .await
            .unwrap();
        connection.close();

        let result = inspect(&factory, "library").await.unwrap();
        assert_eq!(result.version, 3);
        assert_eq!(result.stores.len(), 2);
        let books = &result.stores[0];
        assert_eq!(books.name, "books");
        assert_eq!(books.key_path.as_deref(), Some("isbn"));
        assert_eq!(books.record_count, 1);
        assert_eq!(books.indexes.len(), 1);
        assert_eq!(books.indexes[0].entry_count, 2);
        assert!(books.indexes[0].multi_entry);
        let notes = &result.stores[1];
        assert!(notes.auto_increment);
        assert_eq!(notes.key_path, None);
    }

    #[tokio::test]
    async fn test_inspect_missing_database() {
        let dir = TempDir::new().unwrap();
        let factory = factory(dir.path()).unwrap();
        let err = inspect(&factory, "missing").await.unwrap_err();
        assert!(matches!(err, CliError::DatabaseNotFound(_)));
        assert!(factory.databases().await.unwrap().is_empty());
    }
}

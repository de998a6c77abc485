//! Databases command implementation.

use super::{CliResult, Format};
use serde::Serialize;
use shelfdb_core::Factory;

/// One listed database.
#[derive(Debug, Serialize)]
pub struct DatabaseRow {
    /// Database name.
    pub name: String,
    /// Current version.
    pub version: u64,
}

/// Lists every database in the directory.
pub async fn run(factory: &Factory, format: Format) -> CliResult<()> {
    let rows = collect(factory).await?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        Format::Text if rows.is_empty() => println!("No databases."),
        Format::Text => {
            for row in &rows {
                println!("{}\tv{}", row.name, row.version);
            }
        }
    }
    Ok(())
}

async fn collect(factory: &Factory) -> CliResult<Vec<DatabaseRow>> {
    Ok(factory
        .databases()
        .await?
        .into_iter()
        .map(|info| DatabaseRow {
            name: info.name,
            version: info.version,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::factory;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_lists_created_databases() {
        let dir = TempDir::new().unwrap();
        let factory = factory(dir.path()).unwrap();
        factory.open("b", Some(2), |_| async { Ok(()) }).await.unwrap();
        factory.open("a", None, |_| async { Ok(()) }).await.unwrap();

        let rows = collect(&factory).await.unwrap();
        let listed: Vec<(&str, u64)> = rows.iter().map(|row| (row.name.as_str(), row.version)).collect();
        assert_eq!(listed, vec![("a", 1), ("b", 2)]);
    }
}

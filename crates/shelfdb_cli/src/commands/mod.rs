//! CLI command implementations.

pub mod databases;
pub mod dump;
pub mod inspect;

use shelfdb_core::{Connection, CoreError, Factory};
use shelfdb_storage::{FileBackend, StorageError};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// No database with this name exists in the directory.
    #[error("no database named {0:?}")]
    DatabaseNotFound(String),

    /// The database has no store with this name.
    #[error("database {database:?} has no object store named {store:?}")]
    StoreNotFound {
        /// Database name.
        database: String,
        /// Store name.
        store: String,
    },

    /// Unknown `--format` value.
    #[error("unknown output format {0:?} (expected text or json)")]
    UnknownFormat(String),

    /// Engine error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Backend error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// JSON output error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Output format for commands that support more than one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl std::str::FromStr for Format {
    type Err = CliError;

    fn from_str(s: &str) -> CliResult<Self> {
        match s {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}

/// Builds a factory over the database directory at `path`.
pub fn factory(path: &Path) -> CliResult<Factory> {
    let backend = FileBackend::open(path)?;
    debug!(path = %path.display(), "opened database directory");
    Ok(Factory::new(Arc::new(backend)))
}

/// Opens an existing database at its current version. Never creates one.
pub async fn open_existing(factory: &Factory, name: &str) -> CliResult<Connection> {
    let exists = factory
        .databases()
        .await?
        .iter()
        .any(|info| info.name == name);
    if !exists {
        return Err(CliError::DatabaseNotFound(name.to_string()));
    }
    Ok(factory.open(name, None, |_| async { Ok(()) }).await?)
}

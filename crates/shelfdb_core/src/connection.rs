//! Connections to an open database.

use crate::database::DatabaseInner;
use crate::error::{CoreError, CoreResult};
use crate::events::VersionChangeEvent;
use crate::transaction::{Transaction, TransactionInner, TransactionMode};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type VersionChangeHandler = Arc<dyn Fn(&Connection, VersionChangeEvent) + Send + Sync>;

pub(crate) struct ConnectionInner {
    pub(crate) id: u64,
    pub(crate) db: Arc<DatabaseInner>,
    version: u64,
    close_pending: AtomicBool,
    closed: AtomicBool,
    on_version_change: Mutex<Option<VersionChangeHandler>>,
}

impl ConnectionInner {
    pub(crate) fn is_close_pending(&self) -> bool {
        self.close_pending.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Delivers a version change notification unless the connection is
    /// already closing.
    pub(crate) fn notify_version_change(self: &Arc<Self>, event: VersionChangeEvent) {
        if self.is_close_pending() {
            return;
        }
        let handler = self.on_version_change.lock().clone();
        if let Some(handler) = handler {
            handler(&Connection::from_inner(Arc::clone(self)), event);
        }
    }
}

/// A connection to one database.
///
/// Cloning is cheap; every clone refers to the same connection.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("database", &self.inner.db.name)
            .field("version", &self.version())
            .finish()
    }
}

impl Connection {
    pub(crate) fn open(db: Arc<DatabaseInner>, version: u64) -> Self {
        let inner = Arc::new(ConnectionInner {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            db,
            version,
            close_pending: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            on_version_change: Mutex::new(None),
        });
        inner.db.add_connection(Arc::clone(&inner));
        debug!(database = %inner.db.name, connection = inner.id, version, "connection opened");
        Self { inner }
    }

    fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    /// The database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.db.name
    }

    /// The version this connection was opened at.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version
    }

    /// Names of the database's object stores, sorted.
    #[must_use]
    pub fn object_store_names(&self) -> Vec<String> {
        self.inner.db.store_names()
    }

    /// Starts a transaction over `scope`.
    ///
    /// The transaction is queued behind every earlier unfinished transaction
    /// on the database. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` while this connection runs an upgrade or after
    ///   `close()`.
    /// - `InvalidAccessError` for an empty scope or for
    ///   [`TransactionMode::VersionChange`].
    /// - `NotFoundError` if a named store does not exist.
    pub fn transaction(&self, scope: &[&str], mode: TransactionMode) -> CoreResult<Transaction> {
        let db = &self.inner.db;
        if db.in_version_change(self.inner.id) {
            return Err(CoreError::invalid_state("an upgrade is running on this connection"));
        }
        if self.inner.is_close_pending() {
            return Err(CoreError::invalid_state("the connection is closing"));
        }
        if mode == TransactionMode::VersionChange {
            return Err(CoreError::invalid_access(
                "version change transactions are only created by an upgrading open",
            ));
        }
        if scope.is_empty() {
            return Err(CoreError::invalid_access("a transaction needs at least one object store"));
        }
        let scope: BTreeSet<String> = scope.iter().map(|name| (*name).to_string()).collect();
        if let Some(missing) = scope.iter().find(|name| db.store(name).is_none()) {
            return Err(CoreError::not_found(format!("no object store named {missing:?}")));
        }
        let txn = TransactionInner::new(Arc::clone(db), mode, scope, self.inner.id);
        db.register(Arc::clone(&txn));
        Ok(Transaction::new(txn))
    }

    /// Closes the connection once its transactions have finished. New
    /// transactions are rejected immediately.
    pub fn close(&self) {
        if !self.inner.close_pending.swap(true, Ordering::SeqCst) {
            debug!(database = %self.inner.db.name, connection = self.inner.id, "close requested");
        }
        self.inner.db.resolve_pending_closes();
    }

    /// Returns true once the connection has fully closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Installs the handler called when another caller upgrades or deletes
    /// the database. The handler usually calls [`Connection::close`];
    /// otherwise the other caller stays blocked.
    pub fn on_version_change<F>(&self, handler: F)
    where
        F: Fn(&Connection, VersionChangeEvent) + Send + Sync + 'static,
    {
        *self.inner.on_version_change.lock() = Some(Arc::new(handler));
    }
}

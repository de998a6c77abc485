//! Outcome sinks.
//!
//! The engine does not dispatch events itself. It reports outcomes to an
//! [`EventSink`] supplied by the host; every method defaults to a no-op.

use crate::error::CoreError;

/// Receives engine outcomes.
pub trait EventSink: Send + Sync {
    /// A queued request completed successfully.
    fn request_succeeded(&self, _database: &str, _transaction: u64) {}

    /// A queued request failed.
    fn request_failed(&self, _database: &str, _transaction: u64, _error: &CoreError) {}

    /// A transaction committed.
    fn transaction_completed(&self, _database: &str, _transaction: u64) {}

    /// A transaction aborted, optionally because of `error`.
    fn transaction_aborted(&self, _database: &str, _transaction: u64, _error: Option<&CoreError>) {}

    /// An open or delete is waiting for other connections to close.
    fn blocked(&self, _database: &str, _old_version: u64, _new_version: Option<u64>) {}
}

/// A sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {}

/// Sent to open connections when another caller upgrades or deletes their
/// database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChangeEvent {
    /// The version the connection was opened at.
    pub old_version: u64,
    /// The requested version, or `None` if the database is being deleted.
    pub new_version: Option<u64>,
}

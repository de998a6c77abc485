//! Transaction modes, lifecycle states and outcomes.

use crate::error::CoreError;

/// What a transaction may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only.
    ReadOnly,
    /// Reads and record mutations.
    ReadWrite,
    /// Schema changes plus everything `ReadWrite` allows. Only created by
    /// an upgrading open.
    VersionChange,
}

impl TransactionMode {
    /// Returns true if records may be mutated.
    #[must_use]
    pub fn is_writable(self) -> bool {
        !matches!(self, TransactionMode::ReadOnly)
    }
}

/// Lifecycle state of a transaction.
///
/// A transaction alternates between `Active` and `Inactive` while it
/// drains, then ends in `Finished` by way of `Committing` or `Aborting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// New requests are accepted.
    Active,
    /// A queued operation is running; new requests are rejected.
    Inactive,
    /// `commit()` was called; the queue drains, new requests are rejected.
    Committing,
    /// Rolling back.
    Aborting,
    /// Committed or aborted.
    Finished,
}

/// How a transaction ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    /// Every queued request ran and the changes stay.
    Committed,
    /// The transaction was rolled back, because of the given error or
    /// because `abort()` was called.
    Aborted(Option<CoreError>),
}

impl TransactionOutcome {
    /// Returns true for [`TransactionOutcome::Committed`].
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionOutcome::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_read_only_is_not_writable() {
        assert!(!TransactionMode::ReadOnly.is_writable());
        assert!(TransactionMode::ReadWrite.is_writable());
        assert!(TransactionMode::VersionChange.is_writable());
    }

    #[test]
    fn outcome_predicates() {
        assert!(TransactionOutcome::Committed.is_committed());
        assert!(!TransactionOutcome::Aborted(None).is_committed());
    }
}

//! Per-database transaction scheduling.
//!
//! Transactions run strictly one at a time per database, in creation order,
//! whatever their scope.

use crate::database::DatabaseInner;
use std::sync::Arc;
use tracing::debug;

/// Starts the earliest unfinished transaction if none is running.
///
/// Called whenever a transaction is created and whenever one finishes.
/// Finished transactions are dropped from the database's list here.
pub(crate) fn process_transactions(db: &Arc<DatabaseInner>) {
    let next = {
        let mut transactions = db.transactions.lock();
        transactions.retain(|txn| !txn.is_finished());
        if transactions.iter().any(|txn| txn.is_started()) {
            None
        } else {
            transactions.first().map(|txn| {
                txn.mark_started();
                Arc::clone(txn)
            })
        }
    };
    if let Some(txn) = next {
        debug!(database = %db.name, transaction = txn.id, "scheduling transaction");
        tokio::spawn(txn.drain());
    }
}

//! Cross-crate integration test helpers.
//!
//! [`ModelHarness`] mirrors one out-of-line object store in a `BTreeMap`
//! and checks that the engine agrees with the model after every committed
//! or aborted transaction.

use crate::fixtures::{open_with_stores, read_all};
use crate::generators::Mutation;
use shelfdb_codec::Value;
use shelfdb_core::{Connection, CoreResult, Factory, Key, ObjectStoreOptions, TransactionMode, TransactionOutcome};
use std::collections::BTreeMap;

/// The store every harness works on.
pub const HARNESS_STORE: &str = "model";

/// An object store paired with an in-memory model of its contents.
pub struct ModelHarness {
    /// The connection holding the store.
    pub connection: Connection,
    model: BTreeMap<Key, Value>,
}

impl ModelHarness {
    /// Opens `name` with an empty out-of-line store.
    pub async fn open(factory: &Factory, name: &str) -> Self {
        let connection = open_with_stores(factory, name, &[(HARNESS_STORE, ObjectStoreOptions::default())]).await;
        Self {
            connection,
            model: BTreeMap::new(),
        }
    }

    /// Applies `mutations` in one transaction. When `abort` is set the
    /// transaction is aborted after the last mutation has run; the model
    /// only changes if the transaction commits.
    pub async fn apply(&mut self, mutations: &[Mutation], abort: bool) -> TransactionOutcome {
        let txn = self
            .connection
            .transaction(&[HARNESS_STORE], TransactionMode::ReadWrite)
            .expect("Failed to start transaction");
        let store = txn.object_store(HARNESS_STORE).expect("Failed to open store");
        let mut staged = self.model.clone();
        for mutation in mutations {
            let result: CoreResult<()> = match mutation {
                Mutation::Put(key, value) => {
                    staged.insert(key.clone(), value.clone());
                    store
                        .put(value.clone(), Some(key.clone()))
                        .expect("Failed to queue put")
                        .await
                        .map(|_| ())
                }
                Mutation::Delete(key) => {
                    staged.remove(key);
                    store.delete(key.clone()).expect("Failed to queue delete").await
                }
                Mutation::Clear => {
                    staged.clear();
                    store.clear().expect("Failed to queue clear").await
                }
            };
            result.expect("Mutation failed");
        }
        if abort {
            txn.abort().expect("Failed to abort");
        }
        let outcome = txn.done().await;
        if outcome.is_committed() {
            self.model = staged;
        }
        outcome
    }

    /// Asserts that the store holds exactly the model's records, in order.
    pub async fn verify(&self) {
        let actual = read_all(&self.connection, HARNESS_STORE).await;
        let expected: Vec<(Key, Value)> = self
            .model
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        assert_eq!(actual, expected, "Store contents diverged from the model");
    }

    /// Number of records in the model.
    pub fn tracked_count(&self) -> usize {
        self.model.len()
    }
}

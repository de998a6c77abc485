//! Engine-level property checks.
//!
//! The checks are plain async functions over generated inputs so they can
//! be driven by proptest (see the tests below) or called directly with a
//! hand-picked case.

use crate::fixtures::{object, open_with_stores, put_all, read_all, TestFactory};
use crate::generators::Mutation;
use crate::integration::ModelHarness;
use shelfdb_codec::Value;
use shelfdb_core::{CoreError, Key, KeyRange, ObjectStoreOptions, Query, TransactionMode};
use std::future::Future;

/// Runs `future` to completion on a fresh current-thread runtime.
pub fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
        .block_on(future)
}

/// Commits `setup`, then applies `mutations` in a transaction that aborts;
/// the store must be unchanged afterwards.
pub async fn check_atomicity(setup: &[Mutation], mutations: &[Mutation]) {
    let factory = TestFactory::memory();
    let mut harness = ModelHarness::open(&factory, "atomicity").await;
    harness.apply(setup, false).await;
    harness.verify().await;
    let outcome = harness.apply(mutations, true).await;
    assert!(!outcome.is_committed(), "The transaction should abort");
    harness.verify().await;
}

/// Commits `mutations` and checks the store against the model.
pub async fn check_commit(mutations: &[Mutation]) {
    let factory = TestFactory::memory();
    let mut harness = ModelHarness::open(&factory, "commit").await;
    let outcome = harness.apply(mutations, false).await;
    assert!(outcome.is_committed(), "The transaction should commit");
    harness.verify().await;
}

/// Stores `keys` and checks that an unranged scan is strictly ascending
/// and that a ranged scan is exactly the in-range subsequence.
pub async fn check_scan_order(keys: Vec<Key>, range: KeyRange) {
    let factory = TestFactory::memory();
    let connection = open_with_stores(&factory, "order", &[("s", ObjectStoreOptions::default())]).await;
    let records = keys
        .iter()
        .map(|key| (Some(key.clone()), key.to_value()))
        .collect();
    put_all(&connection, "s", records).await;

    let all: Vec<Key> = read_all(&connection, "s").await.into_iter().map(|(key, _)| key).collect();
    assert!(
        all.windows(2).all(|pair| pair[0] < pair[1]),
        "Scan is not strictly ascending: {all:?}"
    );
    let mut expected = keys;
    expected.sort();
    expected.dedup();
    assert_eq!(all, expected);

    let txn = connection
        .transaction(&["s"], TransactionMode::ReadOnly)
        .expect("Failed to start transaction");
    let ranged = txn
        .object_store("s")
        .expect("Failed to open store")
        .get_all_keys(range.clone(), None)
        .expect("Failed to queue read")
        .await
        .expect("Read failed");
    let in_range: Vec<Key> = all.into_iter().filter(|key| range.includes(key)).collect();
    assert_eq!(ranged, in_range);
}

/// Adds `keys` with `add` in separate transactions; every repeat must fail
/// with `ConstraintError` and leave the first record in place.
pub async fn check_add_uniqueness(keys: Vec<Key>) {
    let factory = TestFactory::memory();
    let connection = open_with_stores(&factory, "unique", &[("s", ObjectStoreOptions::default())]).await;
    let mut stored: Vec<Key> = Vec::new();
    for (position, key) in keys.into_iter().enumerate() {
        let txn = connection
            .transaction(&["s"], TransactionMode::ReadWrite)
            .expect("Failed to start transaction");
        let value = object([("position", Value::from(position as u32))]);
        let result = txn
            .object_store("s")
            .expect("Failed to open store")
            .add(value, Some(key.clone()))
            .expect("Failed to queue add")
            .await;
        let outcome = txn.done().await;
        if stored.contains(&key) {
            assert!(matches!(result, Err(CoreError::ConstraintError(_))));
            assert!(!outcome.is_committed());
        } else {
            assert!(result.is_ok());
            assert!(outcome.is_committed());
            stored.push(key);
        }
    }
    let txn = connection
        .transaction(&["s"], TransactionMode::ReadOnly)
        .expect("Failed to start transaction");
    let count = txn
        .object_store("s")
        .expect("Failed to open store")
        .count(Query::All)
        .expect("Failed to queue count")
        .await
        .expect("Count failed");
    assert_eq!(count, stored.len() as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::{key_range_strategy, key_strategy, mutations_strategy, small_number_key_strategy};
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn aborted_transactions_leave_no_trace(
            setup in mutations_strategy(12),
            mutations in mutations_strategy(12),
        ) {
            block_on(check_atomicity(&setup, &mutations));
        }

        #[test]
        fn committed_transactions_match_the_model(mutations in mutations_strategy(24)) {
            block_on(check_commit(&mutations));
        }

        #[test]
        fn scans_are_ordered_and_ranges_are_contiguous(
            keys in prop::collection::vec(small_number_key_strategy(), 0..24),
            range in key_range_strategy(small_number_key_strategy()),
        ) {
            block_on(check_scan_order(keys, range));
        }

        #[test]
        fn mixed_key_types_scan_in_key_order(
            keys in prop::collection::vec(key_strategy(), 0..12),
            range in key_range_strategy(key_strategy()),
        ) {
            block_on(check_scan_order(keys, range));
        }

        #[test]
        fn add_never_overwrites(keys in prop::collection::vec(small_number_key_strategy(), 1..10)) {
            block_on(check_add_uniqueness(keys));
        }

        #[test]
        fn range_includes_is_pure(
            range in key_range_strategy(key_strategy()),
            key in key_strategy(),
        ) {
            let first = range.includes(&key);
            let copy = range.clone();
            prop_assert_eq!(first, range.includes(&key));
            prop_assert_eq!(first, copy.includes(&key));
        }
    }

    #[tokio::test]
    async fn test_abort_of_clear_restores_everything() {
        let setup = vec![
            Mutation::Put(Key::from(1), Value::from(1)),
            Mutation::Put(Key::from(2), Value::from(2)),
        ];
        check_atomicity(&setup, &[Mutation::Clear, Mutation::Put(Key::from(3), Value::from(3))]).await;
    }
}

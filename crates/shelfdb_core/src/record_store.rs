//! Sorted record storage.
//!
//! A [`RecordStore`] keeps the records of one object store or one index in
//! ascending `(key, value)` order. Lookups and range seeks are binary
//! searches. Records are loaded from the backend on first use and every
//! mutation is written through afterwards: the key list is rewritten and
//! only the touched payload slots are written or removed.

use crate::catalog::{self, Catalog};
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::range::Query;
use parking_lot::Mutex;
use shelfdb_codec::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a record store holds besides the key.
///
/// Object stores hold values; indexes hold primary keys. The payload order
/// breaks ties between records that share a key.
pub(crate) trait Payload: Clone + Send + Sync + 'static {
    fn order(&self, other: &Self) -> Ordering;
    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> CoreResult<Self>;
}

impl Payload for Value {
    fn order(&self, _other: &Self) -> Ordering {
        Ordering::Equal
    }

    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: Value) -> CoreResult<Self> {
        Ok(value)
    }
}

impl Payload for Key {
    fn order(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn to_value(&self) -> Value {
        Key::to_value(self)
    }

    fn from_value(value: Value) -> CoreResult<Self> {
        Key::try_from(&value)
    }
}

/// A `(key, value)` pair.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Record<P> {
    pub(crate) key: Key,
    pub(crate) value: P,
}

/// Scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Forward,
    Reverse,
}

struct Slotted<P> {
    record: Record<P>,
    slot: u64,
}

struct State<P> {
    loaded: bool,
    entries: Vec<Slotted<P>>,
    next_slot: u64,
}

impl<P: Payload> State<P> {
    /// Index of the first entry not below the query's lower bound.
    fn lower_index(&self, query: &Query) -> usize {
        match query.lower() {
            None => 0,
            Some((lower, true)) => self.entries.partition_point(|e| &e.record.key <= lower),
            Some((lower, false)) => self.entries.partition_point(|e| &e.record.key < lower),
        }
    }

    /// One past the index of the last entry not above the upper bound.
    fn upper_index(&self, query: &Query) -> usize {
        match query.upper() {
            None => self.entries.len(),
            Some((upper, true)) => self.entries.partition_point(|e| &e.record.key < upper),
            Some((upper, false)) => self.entries.partition_point(|e| &e.record.key <= upper),
        }
    }

    fn key_list(&self) -> Value {
        let entries = self
            .entries
            .iter()
            .map(|e| Value::Array(vec![e.record.key.to_value(), Value::Number(e.slot as f64)]))
            .collect();
        let mut fields = BTreeMap::new();
        fields.insert("next".to_string(), Value::Number(self.next_slot as f64));
        fields.insert("entries".to_string(), Value::Array(entries));
        Value::Object(fields)
    }
}

fn parse_key_list(list: &Value) -> CoreResult<(u64, Vec<(Key, u64)>)> {
    let malformed = || CoreError::codec("malformed record key list");
    let next = list.get("next").and_then(Value::as_f64).ok_or_else(malformed)?;
    let entries = list
        .get("entries")
        .and_then(Value::as_array)
        .ok_or_else(malformed)?;
    let mut parsed = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry.as_array() {
            Some([key, Value::Number(slot)]) => parsed.push((Key::try_from(key)?, *slot as u64)),
            _ => return Err(malformed()),
        }
    }
    Ok((next as u64, parsed))
}

/// Sorted records of one object store or index.
pub(crate) struct RecordStore<P> {
    id: String,
    catalog: Arc<Catalog>,
    state: Mutex<State<P>>,
}

impl<P: Payload> RecordStore<P> {
    pub(crate) fn new(id: String, catalog: Arc<Catalog>) -> Self {
        Self {
            id,
            catalog,
            state: Mutex::new(State {
                loaded: false,
                entries: Vec::new(),
                next_slot: 0,
            }),
        }
    }

    /// Creates a store known to have nothing persisted yet.
    pub(crate) fn new_empty(id: String, catalog: Arc<Catalog>) -> Self {
        let store = Self::new(id, catalog);
        store.state.lock().loaded = true;
        store
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    async fn ensure_loaded(&self) -> CoreResult<()> {
        if self.state.lock().loaded {
            return Ok(());
        }
        let list = self.catalog.read_value(&catalog::record_keys(&self.id)).await?;
        let (next_slot, keys) = match list {
            Some(list) => parse_key_list(&list)?,
            None => (0, Vec::new()),
        };
        let mut entries = Vec::with_capacity(keys.len());
        for (key, slot) in keys {
            let payload = self
                .catalog
                .read_value(&catalog::record_slot(&self.id, slot))
                .await?
                .ok_or_else(|| CoreError::codec(format!("missing record slot {slot}")))?;
            entries.push(Slotted {
                record: Record {
                    key,
                    value: P::from_value(payload)?,
                },
                slot,
            });
        }
        let mut state = self.state.lock();
        if !state.loaded {
            state.entries = entries;
            state.next_slot = next_slot;
            state.loaded = true;
        }
        Ok(())
    }

    /// Returns the first record matching `query`.
    pub(crate) async fn get(&self, query: &Query) -> CoreResult<Option<Record<P>>> {
        self.ensure_loaded().await?;
        let state = self.state.lock();
        let index = state.lower_index(query);
        Ok(state
            .entries
            .get(index)
            .filter(|e| !query.is_above(&e.record.key))
            .map(|e| e.record.clone()))
    }

    /// Returns a lazy scan over the records matching `query`.
    pub(crate) async fn values(&self, query: Query, direction: Direction) -> CoreResult<RecordIter<'_, P>> {
        self.ensure_loaded().await?;
        let next = {
            let state = self.state.lock();
            match direction {
                Direction::Forward => Some(state.lower_index(&query)),
                Direction::Reverse => state.upper_index(&query).checked_sub(1),
            }
        };
        Ok(RecordIter {
            store: self,
            query,
            direction,
            next,
        })
    }

    /// Collects up to `count` matching records (`None` or `0` means all).
    pub(crate) async fn collect(&self, query: Query, count: Option<u32>) -> CoreResult<Vec<Record<P>>> {
        let limit = match count {
            None | Some(0) => usize::MAX,
            Some(n) => n as usize,
        };
        Ok(self.values(query, Direction::Forward).await?.take(limit).collect())
    }

    /// Counts the records matching `query`.
    pub(crate) async fn count(&self, query: &Query) -> CoreResult<u64> {
        self.ensure_loaded().await?;
        let state = self.state.lock();
        let lower = state.lower_index(query);
        let upper = state.upper_index(query);
        Ok(upper.saturating_sub(lower) as u64)
    }

    /// Inserts a record, keeping `(key, value)` order.
    ///
    /// Key uniqueness is the caller's responsibility.
    pub(crate) async fn add(&self, record: Record<P>) -> CoreResult<()> {
        self.ensure_loaded().await?;
        let payload = record.value.to_value();
        let (slot, list) = {
            let mut state = self.state.lock();
            let index = state.entries.partition_point(|e| match e.record.key.cmp(&record.key) {
                Ordering::Equal => e.record.value.order(&record.value) == Ordering::Less,
                ord => ord == Ordering::Less,
            });
            let slot = state.next_slot;
            state.next_slot += 1;
            state.entries.insert(index, Slotted { record, slot });
            (slot, state.key_list())
        };
        self.catalog
            .write_value(&catalog::record_slot(&self.id, slot), &payload)
            .await?;
        self.catalog
            .write_value(&catalog::record_keys(&self.id), &list)
            .await
    }

    /// Removes every record whose key matches `query`.
    pub(crate) async fn delete(&self, query: &Query) -> CoreResult<Vec<Record<P>>> {
        self.remove_where(|record| query.includes(&record.key)).await
    }

    /// Removes every record.
    pub(crate) async fn clear(&self) -> CoreResult<Vec<Record<P>>> {
        self.remove_where(|_| true).await
    }

    /// Removes every record and the key list itself.
    pub(crate) async fn purge(&self) -> CoreResult<Vec<Record<P>>> {
        let removed = self.clear().await?;
        self.catalog.remove(&catalog::record_keys(&self.id)).await?;
        Ok(removed)
    }

    /// Re-inserts records removed earlier, e.g. while rolling back.
    pub(crate) async fn restore(&self, records: Vec<Record<P>>) -> CoreResult<()> {
        for record in records {
            self.add(record).await?;
        }
        Ok(())
    }

    async fn remove_where(&self, mut matches: impl FnMut(&Record<P>) -> bool) -> CoreResult<Vec<Record<P>>> {
        self.ensure_loaded().await?;
        let (removed, list) = {
            let mut state = self.state.lock();
            let mut removed = Vec::new();
            state.entries.retain(|e| {
                if matches(&e.record) {
                    removed.push((e.record.clone(), e.slot));
                    false
                } else {
                    true
                }
            });
            (removed, state.key_list())
        };
        if removed.is_empty() {
            return Ok(Vec::new());
        }
        self.catalog
            .write_value(&catalog::record_keys(&self.id), &list)
            .await?;
        for (_, slot) in &removed {
            self.catalog
                .remove(&catalog::record_slot(&self.id, *slot))
                .await?;
        }
        Ok(removed.into_iter().map(|(record, _)| record).collect())
    }
}

impl RecordStore<Key> {
    /// Removes every record whose value (a primary key) matches `query`.
    pub(crate) async fn delete_by_value(&self, query: &Query) -> CoreResult<Vec<Record<Key>>> {
        self.remove_where(|record| query.includes(&record.value)).await
    }
}

/// A finite, forward-or-reverse scan over a [`RecordStore`].
///
/// The store is re-locked on every step; the scan stops at the first record
/// past the far bound of its query.
pub(crate) struct RecordIter<'a, P> {
    store: &'a RecordStore<P>,
    query: Query,
    direction: Direction,
    next: Option<usize>,
}

impl<P: Payload> Iterator for RecordIter<'_, P> {
    type Item = Record<P>;

    fn next(&mut self) -> Option<Record<P>> {
        let index = self.next?;
        let state = self.store.state.lock();
        let Some(entry) = state.entries.get(index) else {
            self.next = None;
            return None;
        };
        let out_of_range = match self.direction {
            Direction::Forward => self.query.is_above(&entry.record.key),
            Direction::Reverse => self.query.is_below(&entry.record.key),
        };
        if out_of_range {
            self.next = None;
            return None;
        }
        self.next = match self.direction {
            Direction::Forward => Some(index + 1),
            Direction::Reverse => index.checked_sub(1),
        };
        Some(entry.record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::KeyRange;
    use proptest::prelude::*;
    use shelfdb_codec::SerialCodec;
    use shelfdb_storage::InMemoryBackend;

    fn catalog() -> Arc<Catalog> {
        Arc::new(Catalog::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(SerialCodec),
            "t",
        ))
    }

    fn record(key: i32, value: &str) -> Record<Value> {
        Record {
            key: Key::from(key),
            value: Value::from(value),
        }
    }

    async fn filled(keys: &[i32]) -> RecordStore<Value> {
        let store = RecordStore::new("rs".into(), catalog());
        for &k in keys {
            store.add(record(k, &k.to_string())).await.unwrap();
        }
        store
    }

    fn keys(records: &[Record<Value>]) -> Vec<Key> {
        records.iter().map(|r| r.key.clone()).collect()
    }

    #[tokio::test]
    async fn add_keeps_keys_sorted() {
        let store = filled(&[3, 1, 2]).await;
        let all = store.collect(Query::All, None).await.unwrap();
        assert_eq!(keys(&all), vec![Key::from(1), Key::from(2), Key::from(3)]);
    }

    #[tokio::test]
    async fn same_key_index_entries_order_by_primary_key() {
        let store: RecordStore<Key> = RecordStore::new("ix".into(), catalog());
        for pk in [5, 2, 9] {
            store
                .add(Record {
                    key: Key::from("a"),
                    value: Key::from(pk),
                })
                .await
                .unwrap();
        }
        let values: Vec<Key> = store
            .collect(Query::All, None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![Key::from(2), Key::from(5), Key::from(9)]);
    }

    #[tokio::test]
    async fn get_returns_first_match() {
        let store = filled(&[1, 5, 9]).await;
        let range = KeyRange::bound(Key::from(2), Key::from(9), false, false).unwrap();
        let found = store.get(&Query::Range(range)).await.unwrap().unwrap();
        assert_eq!(found.key, Key::from(5));
        assert!(store.get(&Query::from(4)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reverse_scan_honours_open_bounds() {
        let store = filled(&[1, 2, 3, 4, 5]).await;
        let range = KeyRange::bound(Key::from(2), Key::from(4), true, false).unwrap();
        let scanned: Vec<Key> = store
            .values(Query::Range(range), Direction::Reverse)
            .await
            .unwrap()
            .map(|r| r.key)
            .collect();
        assert_eq!(scanned, vec![Key::from(4), Key::from(3)]);
    }

    #[tokio::test]
    async fn delete_returns_removed_records() {
        let store = filled(&[1, 2, 3, 4]).await;
        let range = KeyRange::bound(Key::from(2), Key::from(3), false, false).unwrap();
        let removed = store.delete(&Query::Range(range)).await.unwrap();
        assert_eq!(keys(&removed), vec![Key::from(2), Key::from(3)]);
        assert_eq!(store.count(&Query::All).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_by_value_matches_primary_keys() {
        let store: RecordStore<Key> = RecordStore::new("ix".into(), catalog());
        for (k, pk) in [("a", 1), ("b", 1), ("c", 2)] {
            store
                .add(Record {
                    key: Key::from(k),
                    value: Key::from(pk),
                })
                .await
                .unwrap();
        }
        let removed = store.delete_by_value(&Query::from(1)).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.count(&Query::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn records_persist_across_instances() {
        let catalog = catalog();
        {
            let store = RecordStore::new("p".into(), Arc::clone(&catalog));
            store.add(record(1, "one")).await.unwrap();
            store.add(record(2, "two")).await.unwrap();
            store.delete(&Query::from(1)).await.unwrap();
        }
        let reopened: RecordStore<Value> = RecordStore::new("p".into(), catalog);
        let all = reopened.collect(Query::All, None).await.unwrap();
        assert_eq!(all, vec![record(2, "two")]);
    }

    #[tokio::test]
    async fn purge_removes_everything_from_the_backend() {
        let backend = Arc::new(InMemoryBackend::new());
        let catalog = Arc::new(Catalog::new(backend.clone(), Arc::new(SerialCodec), "t"));
        let store = RecordStore::new("p".into(), catalog);
        store.add(record(1, "one")).await.unwrap();
        assert!(!backend.is_empty());
        store.purge().await.unwrap();
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn collect_honours_count() {
        let store = filled(&[1, 2, 3]).await;
        assert_eq!(store.collect(Query::All, Some(2)).await.unwrap().len(), 2);
        assert_eq!(store.collect(Query::All, Some(0)).await.unwrap().len(), 3);
    }

    proptest! {
        #[test]
        fn scans_are_sorted_and_contiguous(
            mut input in proptest::collection::btree_set(-30i32..30, 0..20),
            lo in -30i32..30, width in 0i32..30, lo_open: bool, hi_open: bool,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let keys_in: Vec<i32> = std::mem::take(&mut input).into_iter().rev().collect();
            let hi = lo + width;
            let (lo_open, hi_open) = if width == 0 { (false, false) } else { (lo_open, hi_open) };
            let range = KeyRange::bound(Key::from(lo), Key::from(hi), lo_open, hi_open).unwrap();
            let (all, ranged) = runtime.block_on(async {
                let store = filled(&keys_in).await;
                let all = store.collect(Query::All, None).await.unwrap();
                let ranged = store.collect(Query::Range(range.clone()), None).await.unwrap();
                (all, ranged)
            });
            prop_assert!(all.windows(2).all(|w| w[0].key < w[1].key));
            let expected: Vec<Key> = all.iter().map(|r| r.key.clone()).filter(|k| range.includes(k)).collect();
            prop_assert_eq!(keys(&ranged), expected);
        }
    }
}

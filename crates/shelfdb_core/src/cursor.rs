//! Cursors: resumable positions within a ranged scan.
//!
//! Each step of a cursor is a queued operation. A step scans the backing
//! record store from the current position in the cursor's direction and
//! stops at the first record that passes every filter: the range, the
//! position reached so far, and any target key given to `continue_` or
//! `continue_primary_key`. The `*Unique` directions only ever land on the
//! first record of each key.

use crate::error::{CoreError, CoreResult};
use crate::index::Index;
use crate::key::Key;
use crate::object_store::ObjectStore;
use crate::range::{KeyRange, Query};
use crate::record_store::{Direction, Payload, Record, RecordStore};
use crate::request::{Request, Response};
use crate::transaction::TransactionInner;
use parking_lot::Mutex;
use shelfdb_codec::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// Iteration order of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorDirection {
    /// Ascending, every record.
    #[default]
    Next,
    /// Ascending, first record of each key.
    NextUnique,
    /// Descending, every record.
    Prev,
    /// Descending, first record of each key.
    PrevUnique,
}

impl CursorDirection {
    fn is_forward(self) -> bool {
        matches!(self, CursorDirection::Next | CursorDirection::NextUnique)
    }

    fn is_unique(self) -> bool {
        matches!(self, CursorDirection::NextUnique | CursorDirection::PrevUnique)
    }
}

#[derive(Clone)]
pub(crate) enum Source {
    Store(Arc<ObjectStore>),
    Index(Arc<ObjectStore>, Arc<Index>),
}

impl Source {
    fn store(&self) -> &Arc<ObjectStore> {
        match self {
            Source::Store(store) | Source::Index(store, _) => store,
        }
    }

    fn is_deleted(&self) -> bool {
        match self {
            Source::Store(store) => store.is_deleted(),
            Source::Index(store, index) => store.is_deleted() || index.is_deleted(),
        }
    }
}

#[derive(Default)]
struct Position {
    /// Key of the last record visited.
    key: Option<Key>,
    /// Primary key of the last record visited; index cursors only.
    object_store_key: Option<Key>,
}

#[derive(Default)]
struct CursorState {
    position: Position,
    key: Option<Key>,
    primary_key: Option<Key>,
    value: Option<Value>,
    got_value: bool,
}

struct CursorInner {
    txn: Arc<TransactionInner>,
    source: Source,
    range: Query,
    direction: CursorDirection,
    key_only: bool,
    state: Mutex<CursorState>,
}

/// A cursor over an object store or an index.
///
/// Cursors are handed out by the `open_cursor` requests and by each
/// continuation; `None` in their place means the scan is exhausted.
#[derive(Clone)]
pub struct Cursor {
    inner: Arc<CursorInner>,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Cursor")
            .field("direction", &self.inner.direction)
            .field("key", &state.key)
            .field("primary_key", &state.primary_key)
            .finish_non_exhaustive()
    }
}

/// Targets for one iteration step.
#[derive(Default)]
struct Target {
    key: Option<Key>,
    primary_key: Option<Key>,
}

impl Cursor {
    pub(crate) fn new(
        txn: Arc<TransactionInner>,
        source: Source,
        range: Query,
        direction: CursorDirection,
        key_only: bool,
    ) -> Self {
        Self {
            inner: Arc::new(CursorInner {
                txn,
                source,
                range,
                direction,
                key_only,
                state: Mutex::new(CursorState::default()),
            }),
        }
    }

    /// The iteration order.
    #[must_use]
    pub fn direction(&self) -> CursorDirection {
        self.inner.direction
    }

    /// The key at the current position: the primary key for a store
    /// cursor, the index key for an index cursor.
    #[must_use]
    pub fn key(&self) -> Option<Key> {
        self.inner.state.lock().key.clone()
    }

    /// The primary key of the current record.
    #[must_use]
    pub fn primary_key(&self) -> Option<Key> {
        self.inner.state.lock().primary_key.clone()
    }

    /// The current record's value; always `None` for key cursors.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.inner.state.lock().value.clone()
    }

    /// Queues the first step.
    pub(crate) fn start(self) -> CoreResult<Request<Option<Cursor>>> {
        self.queue_steps(Target::default(), 1)
    }

    /// Moves to the next record, or to the first one at or past `key`.
    ///
    /// # Errors
    ///
    /// - `TransactionInactiveError` unless the transaction is active.
    /// - `InvalidStateError` if the source was deleted or the cursor is
    ///   exhausted or already moving.
    /// - `DataError` if `key` is not past the current position.
    pub fn continue_(&self, key: Option<Key>) -> CoreResult<Request<Option<Cursor>>> {
        self.check_movable()?;
        if let Some(key) = &key {
            let state = self.inner.state.lock();
            if let Some(position) = &state.position.key {
                let ordering = key.cmp(position);
                let behind = if self.inner.direction.is_forward() {
                    ordering != Ordering::Greater
                } else {
                    ordering != Ordering::Less
                };
                if behind {
                    return Err(CoreError::data("the target key is not past the cursor position"));
                }
            }
        }
        self.queue_steps(
            Target {
                key,
                primary_key: None,
            },
            1,
        )
    }

    /// Skips `count` records.
    ///
    /// # Errors
    ///
    /// `InvalidAccessError` for a zero count, otherwise as
    /// [`Cursor::continue_`].
    pub fn advance(&self, count: u32) -> CoreResult<Request<Option<Cursor>>> {
        if count == 0 {
            return Err(CoreError::invalid_access("advance count must be positive"));
        }
        self.check_movable()?;
        self.queue_steps(Target::default(), count)
    }

    /// Moves an index cursor to the first entry at or past
    /// `(key, primary_key)`.
    ///
    /// # Errors
    ///
    /// - `InvalidAccessError` for store cursors and unique directions.
    /// - `DataError` if the target is not past the current position.
    /// - Otherwise as [`Cursor::continue_`].
    pub fn continue_primary_key(&self, key: Key, primary_key: Key) -> CoreResult<Request<Option<Cursor>>> {
        self.inner.txn.require_active()?;
        if self.inner.source.is_deleted() {
            return Err(CoreError::invalid_state("the cursor's source was deleted"));
        }
        if !matches!(self.inner.source, Source::Index(..)) || self.inner.direction.is_unique() {
            return Err(CoreError::invalid_access(
                "continue_primary_key needs an index cursor with a non-unique direction",
            ));
        }
        {
            let state = self.inner.state.lock();
            if !state.got_value {
                return Err(CoreError::invalid_state("the cursor is exhausted or already moving"));
            }
            if let (Some(position), Some(object_store_key)) = (&state.position.key, &state.position.object_store_key) {
                let forward = self.inner.direction.is_forward();
                let behind = match key.cmp(position) {
                    Ordering::Equal => {
                        let ordering = primary_key.cmp(object_store_key);
                        if forward {
                            ordering != Ordering::Greater
                        } else {
                            ordering != Ordering::Less
                        }
                    }
                    ordering => (ordering == Ordering::Less) == forward,
                };
                if behind {
                    return Err(CoreError::data("the target is not past the cursor position"));
                }
            }
        }
        self.queue_steps(
            Target {
                key: Some(key),
                primary_key: Some(primary_key),
            },
            1,
        )
    }

    /// Replaces the current record's value.
    ///
    /// # Errors
    ///
    /// - `TransactionInactiveError`, `ReadOnlyError` as for a put.
    /// - `InvalidStateError` for key cursors, deleted sources, or when the
    ///   cursor has no current record.
    /// - `DataError` if the store's key path yields a different key.
    pub fn update(&self, value: impl Into<Value>) -> CoreResult<Request<Key>> {
        let value = value.into();
        let primary_key = self.check_mutable()?;
        let store = Arc::clone(self.inner.source.store());
        if let Some(key_path) = &store.key_path {
            if key_path.extract_key(&value)?.as_ref() != Some(&primary_key) {
                return Err(CoreError::data("the key path yields a different key than the cursor's"));
            }
        }
        let rollback = self.inner.txn.rollback.clone();
        self.inner.txn.request(move || async move {
            let key = store
                .store_record(value, Some(primary_key), false, Some(&rollback))
                .await?;
            Ok(Response::Key(Some(key)))
        })
    }

    /// Deletes the current record.
    ///
    /// # Errors
    ///
    /// As [`Cursor::update`].
    pub fn delete(&self) -> CoreResult<Request<()>> {
        let primary_key = self.check_mutable()?;
        let store = Arc::clone(self.inner.source.store());
        let rollback = self.inner.txn.rollback.clone();
        self.inner.txn.request(move || async move {
            store
                .delete_record(&Query::Key(primary_key), Some(&rollback))
                .await?;
            Ok(Response::Empty)
        })
    }

    fn check_movable(&self) -> CoreResult<()> {
        self.inner.txn.require_active()?;
        if self.inner.source.is_deleted() {
            return Err(CoreError::invalid_state("the cursor's source was deleted"));
        }
        if !self.inner.state.lock().got_value {
            return Err(CoreError::invalid_state("the cursor is exhausted or already moving"));
        }
        Ok(())
    }

    fn check_mutable(&self) -> CoreResult<Key> {
        self.inner.txn.require_active()?;
        self.inner.txn.require_writable()?;
        if self.inner.source.is_deleted() {
            return Err(CoreError::invalid_state("the cursor's source was deleted"));
        }
        let state = self.inner.state.lock();
        if !state.got_value || self.inner.key_only {
            return Err(CoreError::invalid_state("the cursor has no current value"));
        }
        state
            .primary_key
            .clone()
            .ok_or_else(|| CoreError::invalid_state("the cursor has no current record"))
    }

    fn queue_steps(&self, target: Target, count: u32) -> CoreResult<Request<Option<Cursor>>> {
        let cursor = self.clone();
        let request = self.inner.txn.request(move || async move {
            let mut found = cursor.step(&target).await?;
            for _ in 1..count {
                if !found {
                    break;
                }
                found = cursor.step(&Target::default()).await?;
            }
            Ok(Response::Cursor(found.then_some(cursor)))
        })?;
        self.inner.state.lock().got_value = false;
        Ok(request)
    }

    /// Runs one iteration step; returns whether a record was found.
    async fn step(&self, target: &Target) -> CoreResult<bool> {
        match &self.inner.source {
            Source::Store(store) => {
                let hit = self.find(&store.records, target).await?;
                Ok(self.land(hit.map(|record| (record.key.clone(), record.key, Some(record.value)))))
            }
            Source::Index(store, index) => {
                let Some(record) = self.find(&index.records, target).await? else {
                    return Ok(self.land(None));
                };
                let value = if self.inner.key_only {
                    None
                } else {
                    store.get_value(&Query::Key(record.value.clone())).await?
                };
                Ok(self.land(Some((record.key, record.value, value))))
            }
        }
    }

    /// Records the outcome of a step in the cursor state.
    fn land(&self, hit: Option<(Key, Key, Option<Value>)>) -> bool {
        let is_index = matches!(self.inner.source, Source::Index(..));
        let mut state = self.inner.state.lock();
        match hit {
            Some((key, primary_key, value)) => {
                state.position.key = Some(key.clone());
                if is_index {
                    state.position.object_store_key = Some(primary_key.clone());
                }
                state.key = Some(key);
                state.primary_key = Some(primary_key);
                state.value = if self.inner.key_only { None } else { value };
                state.got_value = true;
                true
            }
            None => {
                state.key = None;
                if is_index {
                    state.position.object_store_key = None;
                }
                state.value = None;
                false
            }
        }
    }

    /// Finds the next matching record in `records`.
    async fn find<P: CursorPayload>(&self, records: &RecordStore<P>, target: &Target) -> CoreResult<Option<Record<P>>> {
        let (position, object_store_key) = {
            let state = self.inner.state.lock();
            (state.position.key.clone(), state.position.object_store_key.clone())
        };
        let filter = Filter {
            range: &self.inner.range,
            direction: self.inner.direction,
            is_index: matches!(self.inner.source, Source::Index(..)),
            position: position.as_ref(),
            object_store_key: object_store_key.as_ref(),
            target,
        };
        let scan = filter.scan_range();
        let direction = if self.inner.direction.is_forward() {
            Direction::Forward
        } else {
            Direction::Reverse
        };
        let hit = records
            .values(scan, direction)
            .await?
            .find(|record| filter.accepts(&record.key, record.value.as_primary_key()));
        match (hit, self.inner.direction) {
            // A reverse unique scan lands on the last record of a key; step
            // back to the first one.
            (Some(record), CursorDirection::PrevUnique) => {
                Ok(records.get(&Query::Key(record.key.clone())).await?.or(Some(record)))
            }
            (hit, _) => Ok(hit),
        }
    }
}

/// Payloads a cursor can walk. Index payloads are primary keys and take
/// part in the position filters.
trait CursorPayload: Payload {
    fn as_primary_key(&self) -> Option<&Key>;
}

impl CursorPayload for Value {
    fn as_primary_key(&self) -> Option<&Key> {
        None
    }
}

impl CursorPayload for Key {
    fn as_primary_key(&self) -> Option<&Key> {
        Some(self)
    }
}

struct Filter<'a> {
    range: &'a Query,
    direction: CursorDirection,
    is_index: bool,
    position: Option<&'a Key>,
    object_store_key: Option<&'a Key>,
    target: &'a Target,
}

impl Filter<'_> {
    /// A closed superset of the records the filter can accept, used to seek
    /// the scan.
    fn scan_range(&self) -> Query {
        let candidates = [self.target.key.as_ref(), self.position];
        if self.direction.is_forward() {
            let mut lower = self.range.lower().map(|(key, _)| key);
            for candidate in candidates.into_iter().flatten() {
                if lower.map_or(true, |lower| candidate > lower) {
                    lower = Some(candidate);
                }
            }
            let upper = self.range.upper().map(|(key, _)| key.clone());
            Query::Range(KeyRange::closed(lower.cloned(), upper))
        } else {
            let mut upper = self.range.upper().map(|(key, _)| key);
            for candidate in candidates.into_iter().flatten() {
                if upper.map_or(true, |upper| candidate < upper) {
                    upper = Some(candidate);
                }
            }
            let lower = self.range.lower().map(|(key, _)| key.clone());
            Query::Range(KeyRange::closed(lower, upper.cloned()))
        }
    }

    fn accepts(&self, key: &Key, primary_key: Option<&Key>) -> bool {
        let forward = self.direction.is_forward();
        // `Greater` for forward scans, `Less` for reverse ones.
        let ahead = if forward { Ordering::Greater } else { Ordering::Less };

        if let Some(target) = &self.target.key {
            if key.cmp(target) == ahead.reverse() {
                return false;
            }
            if let (Some(target_pk), Some(pk)) = (&self.target.primary_key, primary_key) {
                if key == target && pk.cmp(target_pk) == ahead.reverse() {
                    return false;
                }
            }
        }

        if let Some(position) = self.position {
            let ordering = key.cmp(position);
            if self.direction.is_unique() || !self.is_index {
                if ordering != ahead {
                    return false;
                }
            } else {
                if ordering == ahead.reverse() {
                    return false;
                }
                if ordering == Ordering::Equal {
                    let past = match (primary_key, self.object_store_key) {
                        (Some(pk), Some(last)) => pk.cmp(last) == ahead,
                        _ => false,
                    };
                    if !past {
                        return false;
                    }
                }
            }
        }

        self.range.includes(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter<'a>(
        range: &'a Query,
        direction: CursorDirection,
        position: Option<&'a Key>,
        object_store_key: Option<&'a Key>,
        target: &'a Target,
    ) -> Filter<'a> {
        Filter {
            range,
            direction,
            is_index: object_store_key.is_some(),
            position,
            object_store_key,
            target,
        }
    }

    #[test]
    fn forward_scan_starts_at_the_furthest_bound() {
        let range = Query::Range(KeyRange::lower_bound(Key::from(2), true));
        let position = Key::from(5);
        let target = Target::default();
        let f = filter(&range, CursorDirection::Next, Some(&position), None, &target);
        assert_eq!(
            f.scan_range(),
            Query::Range(KeyRange::closed(Some(Key::from(5)), None))
        );
        assert!(!f.accepts(&Key::from(5), None));
        assert!(f.accepts(&Key::from(6), None));
    }

    #[test]
    fn reverse_scan_respects_open_upper_bound() {
        let range = Query::Range(KeyRange::bound(Key::from(1), Key::from(4), false, true).unwrap());
        let target = Target::default();
        let f = filter(&range, CursorDirection::Prev, None, None, &target);
        assert!(!f.accepts(&Key::from(4), None));
        assert!(f.accepts(&Key::from(3), None));
    }

    #[test]
    fn index_position_uses_primary_key_for_duplicates() {
        let range = Query::All;
        let position = Key::from("a");
        let last = Key::from(2);
        let target = Target::default();
        let f = filter(&range, CursorDirection::Next, Some(&position), Some(&last), &target);
        assert!(!f.accepts(&Key::from("a"), Some(&Key::from(1))));
        assert!(!f.accepts(&Key::from("a"), Some(&Key::from(2))));
        assert!(f.accepts(&Key::from("a"), Some(&Key::from(3))));
        assert!(f.accepts(&Key::from("b"), Some(&Key::from(0))));
    }

    #[test]
    fn unique_directions_skip_the_current_key() {
        let range = Query::All;
        let position = Key::from("a");
        let last = Key::from(2);
        let target = Target::default();
        let f = filter(&range, CursorDirection::NextUnique, Some(&position), Some(&last), &target);
        assert!(!f.accepts(&Key::from("a"), Some(&Key::from(3))));
        assert!(f.accepts(&Key::from("b"), Some(&Key::from(0))));
    }

    #[test]
    fn target_primary_key_narrows_within_a_key() {
        let range = Query::All;
        let target = Target {
            key: Some(Key::from("b")),
            primary_key: Some(Key::from(5)),
        };
        let f = filter(&range, CursorDirection::Next, None, None, &target);
        assert!(!f.accepts(&Key::from("a"), Some(&Key::from(9))));
        assert!(!f.accepts(&Key::from("b"), Some(&Key::from(4))));
        assert!(f.accepts(&Key::from("b"), Some(&Key::from(5))));
        assert!(f.accepts(&Key::from("c"), Some(&Key::from(1))));
    }
}

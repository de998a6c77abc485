//! Key ranges and queries.

use crate::error::{CoreError, CoreResult};
use crate::key::Key;

/// A contiguous interval of keys.
///
/// Either bound may be absent. When both are present `lower <= upper`, and
/// equal bounds are always closed.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl KeyRange {
    /// A range containing exactly `key`.
    #[must_use]
    pub fn only(key: Key) -> Self {
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    /// All keys above `key` (or equal to it unless `open`).
    #[must_use]
    pub fn lower_bound(key: Key, open: bool) -> Self {
        Self {
            lower: Some(key),
            upper: None,
            lower_open: open,
            upper_open: true,
        }
    }

    /// All keys below `key` (or equal to it unless `open`).
    #[must_use]
    pub fn upper_bound(key: Key, open: bool) -> Self {
        Self {
            lower: None,
            upper: Some(key),
            lower_open: true,
            upper_open: open,
        }
    }

    /// All keys between `lower` and `upper`.
    ///
    /// # Errors
    ///
    /// Returns `DataError` if `lower > upper`, or if they are equal and
    /// either bound is open.
    pub fn bound(lower: Key, upper: Key, lower_open: bool, upper_open: bool) -> CoreResult<Self> {
        match lower.cmp(&upper) {
            std::cmp::Ordering::Greater => {
                return Err(CoreError::data("lower bound is greater than upper bound"));
            }
            std::cmp::Ordering::Equal if lower_open || upper_open => {
                return Err(CoreError::data("equal bounds must both be closed"));
            }
            _ => {}
        }
        Ok(Self {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        })
    }

    /// Builds a closed range without validating its bounds. An inverted
    /// range simply matches nothing.
    pub(crate) fn closed(lower: Option<Key>, upper: Option<Key>) -> Self {
        Self {
            lower,
            upper,
            lower_open: false,
            upper_open: false,
        }
    }

    /// The lower bound, if any.
    #[must_use]
    pub fn lower(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    /// The upper bound, if any.
    #[must_use]
    pub fn upper(&self) -> Option<&Key> {
        self.upper.as_ref()
    }

    /// Whether the lower bound is excluded.
    #[must_use]
    pub fn lower_open(&self) -> bool {
        self.lower_open
    }

    /// Whether the upper bound is excluded.
    #[must_use]
    pub fn upper_open(&self) -> bool {
        self.upper_open
    }

    /// Returns true if `key` lies inside the range.
    #[must_use]
    pub fn includes(&self, key: &Key) -> bool {
        !self.is_below(key) && !self.is_above(key)
    }

    /// Returns true if `key` lies before the lower bound.
    pub(crate) fn is_below(&self, key: &Key) -> bool {
        match &self.lower {
            Some(lower) if self.lower_open => key <= lower,
            Some(lower) => key < lower,
            None => false,
        }
    }

    /// Returns true if `key` lies past the upper bound.
    pub(crate) fn is_above(&self, key: &Key) -> bool {
        match &self.upper {
            Some(upper) if self.upper_open => key >= upper,
            Some(upper) => key > upper,
            None => false,
        }
    }
}

/// What a read or delete applies to: every record, one key, or a range.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Query {
    /// Every record.
    #[default]
    All,
    /// The record(s) with exactly this key.
    Key(Key),
    /// Records whose key lies in the range.
    Range(KeyRange),
}

impl Query {
    /// Returns true if `key` matches the query.
    #[must_use]
    pub fn includes(&self, key: &Key) -> bool {
        match self {
            Query::All => true,
            Query::Key(k) => k == key,
            Query::Range(range) => range.includes(key),
        }
    }

    /// The query expressed as a range; `None` means unbounded.
    #[must_use]
    pub fn to_range(&self) -> Option<KeyRange> {
        match self {
            Query::All => None,
            Query::Key(k) => Some(KeyRange::only(k.clone())),
            Query::Range(range) => Some(range.clone()),
        }
    }

    pub(crate) fn is_below(&self, key: &Key) -> bool {
        match self {
            Query::All => false,
            Query::Key(k) => key < k,
            Query::Range(range) => range.is_below(key),
        }
    }

    pub(crate) fn is_above(&self, key: &Key) -> bool {
        match self {
            Query::All => false,
            Query::Key(k) => key > k,
            Query::Range(range) => range.is_above(key),
        }
    }

    /// The lower bound and whether it is open.
    pub(crate) fn lower(&self) -> Option<(&Key, bool)> {
        match self {
            Query::All => None,
            Query::Key(k) => Some((k, false)),
            Query::Range(range) => range.lower().map(|k| (k, range.lower_open())),
        }
    }

    /// The upper bound and whether it is open.
    pub(crate) fn upper(&self) -> Option<(&Key, bool)> {
        match self {
            Query::All => None,
            Query::Key(k) => Some((k, false)),
            Query::Range(range) => range.upper().map(|k| (k, range.upper_open())),
        }
    }
}

impl From<Key> for Query {
    fn from(key: Key) -> Self {
        Query::Key(key)
    }
}

impl From<KeyRange> for Query {
    fn from(range: KeyRange) -> Self {
        Query::Range(range)
    }
}

impl From<Option<KeyRange>> for Query {
    fn from(range: Option<KeyRange>) -> Self {
        range.map_or(Query::All, Query::Range)
    }
}

impl From<i32> for Query {
    fn from(n: i32) -> Self {
        Query::Key(Key::from(n))
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Query::Key(Key::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn only_includes_just_the_key() {
        let range = KeyRange::only(Key::from(3));
        assert!(range.includes(&Key::from(3)));
        assert!(!range.includes(&Key::from(2)));
        assert!(!range.includes(&Key::from(4)));
    }

    #[test]
    fn open_bounds_exclude_endpoints() {
        let range = KeyRange::bound(Key::from(1), Key::from(5), true, true).unwrap();
        assert!(!range.includes(&Key::from(1)));
        assert!(range.includes(&Key::from(3)));
        assert!(!range.includes(&Key::from(5)));
    }

    #[test]
    fn unbounded_sides() {
        let lower = KeyRange::lower_bound(Key::from("m"), false);
        assert!(lower.includes(&Key::Array(vec![])));
        assert!(!lower.includes(&Key::from(1000)));

        let upper = KeyRange::upper_bound(Key::from(0), true);
        assert!(upper.includes(&Key::Number(f64::NEG_INFINITY)));
        assert!(!upper.includes(&Key::from(0)));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = KeyRange::bound(Key::from(5), Key::from(1), false, false).unwrap_err();
        assert_eq!(err.name(), "DataError");
    }

    #[test]
    fn equal_open_bounds_are_rejected() {
        assert!(KeyRange::bound(Key::from(1), Key::from(1), false, true).is_err());
        assert!(KeyRange::bound(Key::from(1), Key::from(1), false, false).is_ok());
    }

    #[test]
    fn query_conversions() {
        assert_eq!(Query::from(1), Query::Key(Key::from(1)));
        assert_eq!(Query::from(None), Query::All);
        assert!(Query::All.includes(&Key::from("anything")));
    }

    proptest! {
        #[test]
        fn includes_matches_bound_definition(
            lo in -50i32..50, width in 0i32..50, lo_open: bool, hi_open: bool, k in -100i32..100
        ) {
            let hi = lo + width;
            let (lo_open, hi_open) = if width == 0 { (false, false) } else { (lo_open, hi_open) };
            let range = KeyRange::bound(Key::from(lo), Key::from(hi), lo_open, hi_open).unwrap();
            let above_lower = if lo_open { k > lo } else { k >= lo };
            let below_upper = if hi_open { k < hi } else { k <= hi };
            let key = Key::from(k);
            prop_assert_eq!(range.includes(&key), above_lower && below_upper);
            prop_assert_eq!(range.includes(&key), range.clone().includes(&key));
        }
    }
}

//! Keys and their total order.
//!
//! A [`Key`] is the subset of [`Value`] that can identify a record: finite or
//! infinite numbers (never `NaN`), valid dates, strings, binary buffers and
//! arrays of keys. Keys of different types order as
//! `number < date < string < binary < array`; arrays compare element-wise
//! and then by length. Strings compare by UTF-16 code unit.

use crate::error::{CoreError, CoreResult};
use shelfdb_codec::Value;
use std::cmp::Ordering;
use std::fmt;

/// A valid key.
#[derive(Debug, Clone)]
pub enum Key {
    /// A number other than `NaN`.
    Number(f64),
    /// A valid date, in milliseconds since the Unix epoch.
    Date(f64),
    /// A string.
    String(String),
    /// A binary buffer.
    Binary(Vec<u8>),
    /// An array of keys.
    Array(Vec<Key>),
}

impl Key {
    /// Creates a number key.
    ///
    /// # Errors
    ///
    /// Returns `DataError` for `NaN`.
    pub fn number(n: f64) -> CoreResult<Self> {
        if n.is_nan() {
            return Err(CoreError::data("NaN is not a valid key"));
        }
        Ok(Key::Number(n))
    }

    /// Creates a date key.
    ///
    /// # Errors
    ///
    /// Returns `DataError` for an invalid (`NaN`) date.
    pub fn date(ms: f64) -> CoreResult<Self> {
        if ms.is_nan() {
            return Err(CoreError::data("an invalid date is not a valid key"));
        }
        Ok(Key::Date(ms))
    }

    /// Converts the key back into a value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => Value::Number(*n),
            Key::Date(ms) => Value::Date(*ms),
            Key::String(s) => Value::String(s.clone()),
            Key::Binary(bytes) => Value::Binary(bytes.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    /// Returns the number if this is a number key.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Date(_) => 1,
            Key::String(_) => 2,
            Key::Binary(_) => 3,
            Key::Array(_) => 4,
        }
    }
}

/// Returns true if `value` converts to a key.
#[must_use]
pub fn is_valid_key(value: &Value) -> bool {
    Key::try_from(value).is_ok()
}

/// Compares two values as keys.
///
/// # Errors
///
/// Returns `DataError` if either value is not a valid key.
pub fn compare(a: &Value, b: &Value) -> CoreResult<Ordering> {
    Ok(Key::try_from(a)?.cmp(&Key::try_from(b)?))
}

impl TryFrom<&Value> for Key {
    type Error = CoreError;

    fn try_from(value: &Value) -> CoreResult<Self> {
        match value {
            Value::Number(n) => Key::number(*n),
            Value::Date(ms) => Key::date(*ms),
            Value::String(s) => Ok(Key::String(s.clone())),
            Value::Binary(bytes) => Ok(Key::Binary(bytes.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::try_from)
                .collect::<CoreResult<Vec<_>>>()
                .map(Key::Array),
            other => Err(CoreError::data(format!(
                "a value of type {} is not a valid key",
                other.type_name()
            ))),
        }
    }
}

impl TryFrom<Value> for Key {
    type Error = CoreError;

    fn try_from(value: Value) -> CoreResult<Self> {
        Key::try_from(&value)
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) | (Key::Date(a), Key::Date(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Key::String(a), Key::String(b)) => a.encode_utf16().cmp(b.encode_utf16()),
            (Key::Binary(a), Key::Binary(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(f64::from(n))
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Number(f64::from(n))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{n}"),
            Key::Date(ms) => write!(f, "date({ms})"),
            Key::String(s) => write!(f, "{s:?}"),
            Key::Binary(bytes) => {
                write!(f, "0x")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Key::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn type_order() {
        let keys = [
            Key::Number(f64::INFINITY),
            Key::Date(0.0),
            Key::from(""),
            Key::Binary(vec![]),
            Key::Array(vec![]),
        ];
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn arrays_compare_elementwise_then_by_length() {
        let short = Key::Array(vec![Key::from(1), Key::from(2)]);
        let long = Key::Array(vec![Key::from(1), Key::from(2), Key::from(0)]);
        let bigger = Key::Array(vec![Key::from(2)]);
        assert!(short < long);
        assert!(long < bigger);
    }

    #[test]
    fn zero_signs_are_equal() {
        assert_eq!(Key::Number(0.0), Key::Number(-0.0));
    }

    #[test]
    fn strings_compare_by_utf16_code_units() {
        // U+FF61 is a single unit above the surrogate range; U+10000 encodes
        // as a surrogate pair starting at 0xD800.
        let bmp = Key::from("\u{ff61}");
        let astral = Key::from("\u{10000}");
        assert!(astral < bmp);
    }

    #[test]
    fn nan_is_rejected() {
        assert!(Key::number(f64::NAN).is_err());
        assert!(Key::try_from(&Value::Date(f64::NAN)).is_err());
        assert!(Key::try_from(&Value::Array(vec![Value::Number(f64::NAN)])).is_err());
    }

    #[test]
    fn non_key_values_are_rejected() {
        for value in [
            Value::Undefined,
            Value::Null,
            Value::Bool(true),
            Value::empty_object(),
        ] {
            let err = Key::try_from(&value).unwrap_err();
            assert_eq!(err.name(), "DataError");
        }
    }

    #[test]
    fn compare_values() {
        assert_eq!(
            compare(&Value::from(1), &Value::from("a")).unwrap(),
            Ordering::Less
        );
        assert!(compare(&Value::Null, &Value::from(1)).is_err());
    }

    #[test]
    fn to_value_round_trips() {
        let key = Key::Array(vec![Key::from("a"), Key::Date(5.0), Key::Binary(vec![1])]);
        assert_eq!(Key::try_from(&key.to_value()).unwrap(), key);
    }

    fn arb_key() -> impl Strategy<Value = Key> {
        let leaf = prop_oneof![
            (-1e6f64..1e6).prop_map(Key::Number),
            (0f64..1e12).prop_map(Key::Date),
            "[a-c]{0,3}".prop_map(Key::String),
            proptest::collection::vec(0u8..3, 0..3).prop_map(Key::Binary),
        ];
        leaf.prop_recursive(2, 8, 3, |inner| {
            proptest::collection::vec(inner, 0..3).prop_map(Key::Array)
        })
    }

    proptest! {
        #[test]
        fn ordering_is_antisymmetric(a in arb_key(), b in arb_key()) {
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        }

        #[test]
        fn ordering_is_transitive(a in arb_key(), b in arb_key(), c in arb_key()) {
            if a <= b && b <= c {
                prop_assert!(a <= c);
            }
        }
    }
}

//! Key paths: deriving keys from stored values.

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use serde::{Deserialize, Serialize};
use shelfdb_codec::Value;

/// A field-access expression that derives a key from a value.
///
/// A single path is either empty (the value itself) or dot-separated
/// identifiers, e.g. `"address.city"`. A sequence path evaluates each
/// component and combines the results into an array key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    /// A single, possibly dotted, path.
    Single(String),
    /// Several paths producing an array key.
    Sequence(Vec<String>),
}

impl KeyPath {
    /// Checks that the path is well formed.
    ///
    /// # Errors
    ///
    /// Returns `SyntaxError` for an empty sequence or a component that is
    /// not a dotted list of identifiers.
    pub fn validate(&self) -> CoreResult<()> {
        match self {
            KeyPath::Single(path) => validate_path(path),
            KeyPath::Sequence(paths) => {
                if paths.is_empty() {
                    return Err(CoreError::syntax("a key path sequence must not be empty"));
                }
                paths.iter().try_for_each(|p| validate_path(p))
            }
        }
    }

    /// Returns true for a sequence path.
    #[must_use]
    pub fn is_sequence(&self) -> bool {
        matches!(self, KeyPath::Sequence(_))
    }

    /// Evaluates the path against `value`.
    ///
    /// A single path returns `Ok(None)` when a component is missing. A
    /// sequence path requires every component to yield a valid key.
    ///
    /// # Errors
    ///
    /// Returns `DataError` if a sequence component is missing or is not a
    /// valid key.
    pub fn extract(&self, value: &Value) -> CoreResult<Option<Value>> {
        match self {
            KeyPath::Single(path) => Ok(evaluate(path, value)),
            KeyPath::Sequence(paths) => {
                let mut parts = Vec::with_capacity(paths.len());
                for path in paths {
                    let part = evaluate(path, value).ok_or_else(|| {
                        CoreError::data(format!("key path {path:?} yielded no value"))
                    })?;
                    parts.push(Key::try_from(&part)?.to_value());
                }
                Ok(Some(Value::Array(parts)))
            }
        }
    }

    /// Evaluates the path and converts the result to a key.
    ///
    /// # Errors
    ///
    /// Returns `DataError` if the path yields a value that is not a key.
    pub fn extract_key(&self, value: &Value) -> CoreResult<Option<Key>> {
        self.extract(value)?
            .map(|v| Key::try_from(&v))
            .transpose()
    }

    /// Returns true if a generated key could be written into `value` along
    /// this path.
    #[must_use]
    pub fn can_inject(&self, value: &Value) -> bool {
        let KeyPath::Single(path) = self else {
            return false;
        };
        let mut identifiers: Vec<&str> = path.split('.').collect();
        identifiers.pop();
        let mut current = value;
        for identifier in identifiers {
            let Value::Object(fields) = current else {
                return false;
            };
            match fields.get(identifier) {
                Some(next) => current = next,
                None => return true,
            }
        }
        matches!(current, Value::Object(_))
    }

    /// Writes `key` into `value` along this path, creating intermediate
    /// objects as needed.
    ///
    /// # Errors
    ///
    /// Returns `DataError` for a sequence path or if a non-object value is
    /// in the way.
    pub fn inject(&self, value: &mut Value, key: &Key) -> CoreResult<()> {
        let KeyPath::Single(path) = self else {
            return Err(CoreError::data("cannot inject a key along a sequence key path"));
        };
        let mut identifiers: Vec<&str> = path.split('.').collect();
        let last = identifiers
            .pop()
            .ok_or_else(|| CoreError::data("empty key path"))?;
        let mut current = value;
        for identifier in identifiers {
            let fields = current
                .as_object_mut()
                .ok_or_else(|| CoreError::data("cannot inject a key into a non-object value"))?;
            current = fields
                .entry(identifier.to_string())
                .or_insert_with(Value::empty_object);
        }
        let fields = current
            .as_object_mut()
            .ok_or_else(|| CoreError::data("cannot inject a key into a non-object value"))?;
        fields.insert(last.to_string(), key.to_value());
        Ok(())
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::Single(path.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        KeyPath::Single(path)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(paths: Vec<&str>) -> Self {
        KeyPath::Sequence(paths.into_iter().map(str::to_string).collect())
    }
}

impl std::fmt::Display for KeyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyPath::Single(path) => write!(f, "{path:?}"),
            KeyPath::Sequence(paths) => write!(f, "{paths:?}"),
        }
    }
}

fn validate_path(path: &str) -> CoreResult<()> {
    if path.is_empty() {
        return Ok(());
    }
    if path.split('.').all(is_identifier) {
        Ok(())
    } else {
        Err(CoreError::syntax(format!("{path:?} is not a valid key path")))
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '$' || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '$' || c == '_')
}

/// Walks a single path. `length` is understood on strings and arrays.
fn evaluate(path: &str, value: &Value) -> Option<Value> {
    if path.is_empty() {
        return Some(value.clone()).filter(|v| !v.is_undefined());
    }
    let mut current = value.clone();
    for identifier in path.split('.') {
        current = match (&current, identifier) {
            (Value::String(s), "length") => Value::Number(s.encode_utf16().count() as f64),
            (Value::Array(items), "length") => Value::Number(items.len() as f64),
            (Value::Object(fields), _) => fields.get(identifier)?.clone(),
            _ => return None,
        };
    }
    Some(current).filter(|v| !v.is_undefined())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Value {
        Value::object([
            ("name", Value::from("Ada")),
            ("tags", Value::Array(vec![Value::from("a"), Value::from("b")])),
            (
                "address",
                Value::object([("city", Value::from("London"))]),
            ),
            ("nothing", Value::Undefined),
        ])
    }

    #[test]
    fn validation() {
        assert!(KeyPath::from("").validate().is_ok());
        assert!(KeyPath::from("a.b_c.$d").validate().is_ok());
        assert!(KeyPath::from("a..b").validate().is_err());
        assert!(KeyPath::from("1a").validate().is_err());
        assert!(KeyPath::from(" a").validate().is_err());
        assert!(KeyPath::Sequence(vec![]).validate().is_err());
        let err = KeyPath::from(vec!["a", "b c"]).validate().unwrap_err();
        assert_eq!(err.name(), "SyntaxError");
    }

    #[test]
    fn extract_nested_field() {
        let path = KeyPath::from("address.city");
        assert_eq!(path.extract(&person()).unwrap(), Some(Value::from("London")));
    }

    #[test]
    fn extract_missing_field_is_none() {
        assert_eq!(KeyPath::from("address.zip").extract(&person()).unwrap(), None);
        assert_eq!(KeyPath::from("name.first").extract(&person()).unwrap(), None);
        assert_eq!(KeyPath::from("nothing").extract(&person()).unwrap(), None);
    }

    #[test]
    fn extract_length_identifier() {
        assert_eq!(
            KeyPath::from("name.length").extract(&person()).unwrap(),
            Some(Value::from(3))
        );
        assert_eq!(
            KeyPath::from("tags.length").extract(&person()).unwrap(),
            Some(Value::from(2))
        );
    }

    #[test]
    fn empty_path_is_the_value() {
        assert_eq!(
            KeyPath::from("").extract(&Value::from(7)).unwrap(),
            Some(Value::from(7))
        );
    }

    #[test]
    fn sequence_builds_array_key() {
        let path = KeyPath::from(vec!["name", "address.city"]);
        assert_eq!(
            path.extract_key(&person()).unwrap(),
            Some(Key::Array(vec![Key::from("Ada"), Key::from("London")]))
        );
    }

    #[test]
    fn sequence_with_missing_component_is_data_error() {
        let path = KeyPath::from(vec!["name", "missing"]);
        assert_eq!(path.extract(&person()).unwrap_err().name(), "DataError");
    }

    #[test]
    fn can_inject_checks_intermediate_values() {
        let path = KeyPath::from("a.b.id");
        assert!(path.can_inject(&Value::empty_object()));
        assert!(path.can_inject(&Value::object([("a", Value::empty_object())])));
        assert!(!path.can_inject(&Value::object([("a", Value::from(1))])));
        assert!(!path.can_inject(&Value::from("scalar")));
    }

    #[test]
    fn inject_creates_intermediate_objects() {
        let mut value = Value::object([("v", Value::from(1))]);
        KeyPath::from("meta.id")
            .inject(&mut value, &Key::from(9))
            .unwrap();
        assert_eq!(
            KeyPath::from("meta.id").extract(&value).unwrap(),
            Some(Value::from(9))
        );
        assert_eq!(value.get("v"), Some(&Value::from(1)));
    }

    #[test]
    fn serde_shape_is_untagged() {
        let json = serde_json::to_string(&KeyPath::from(vec!["a", "b"])).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
        let single: KeyPath = serde_json::from_str(r#""id""#).unwrap();
        assert_eq!(single, KeyPath::from("id"));
    }
}

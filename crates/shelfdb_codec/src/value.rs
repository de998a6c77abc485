//! Dynamic structured value type.

use std::collections::BTreeMap;

/// A dynamic structured value.
///
/// This is the payload type stored in object stores. It covers the
/// structured-clone data model: primitives, dates, binary buffers, arrays,
/// string-keyed objects and error objects.
///
/// Equality follows "same value" semantics for numbers: `NaN` equals `NaN`
/// and `0.0` differs from `-0.0`, so a value always equals its decoded copy.
#[derive(Debug, Clone)]
pub enum Value {
    /// The absent value.
    Undefined,
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Double-precision number, including non-finite values.
    Number(f64),
    /// Text string.
    String(String),
    /// Date as milliseconds since the Unix epoch. `NaN` marks an invalid date.
    Date(f64),
    /// Binary buffer.
    Binary(Vec<u8>),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// String-keyed object.
    Object(BTreeMap<String, Value>),
    /// Error object.
    Error {
        /// Error name, e.g. `TypeError`.
        name: String,
        /// Error message.
        message: String,
    },
}

impl Value {
    /// Creates an object value from `(field, value)` pairs.
    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Creates an empty object value.
    #[must_use]
    pub fn empty_object() -> Self {
        Value::Object(BTreeMap::new())
    }

    /// Returns a short name for the value's type, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Binary(_) => "binary",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Error { .. } => "error",
        }
    }

    /// Returns true for [`Value::Undefined`].
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Returns the number if this is a [`Value::Number`].
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string slice if this is a [`Value::String`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the elements if this is a [`Value::Array`].
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the fields if this is a [`Value::Object`].
    #[must_use]
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Returns the fields mutably if this is a [`Value::Object`].
    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Looks up a field of an object value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_object().and_then(|fields| fields.get(field))
    }

    /// Converts to a plain JSON value for display.
    ///
    /// The conversion is lossy: undefined becomes `null`, non-finite numbers
    /// become strings, and dates, binaries and errors are wrapped in tagged
    /// objects (`{"$date": ms}`, `{"$binary": [..]}`, `{"$error": {..}}`).
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Value as Json};
        match self {
            Value::Undefined | Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => Json::String(s.clone()),
            Value::Date(ms) => json!({ "$date": number_to_json(*ms) }),
            Value::Binary(bytes) => json!({ "$binary": bytes }),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Error { name, message } => {
                json!({ "$error": { "name": name, "message": message } })
            }
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or_else(|| serde_json::Value::String(n.to_string()))
}

/// Numeric equality that distinguishes `-0` and treats `NaN` as equal to itself.
fn same_number(a: f64, b: f64) -> bool {
    if a.is_nan() && b.is_nan() {
        return true;
    }
    a == b && a.is_sign_negative() == b.is_sign_negative()
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) | (Value::Date(a), Value::Date(b)) => {
                same_number(*a, *b)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (
                Value::Error {
                    name: an,
                    message: am,
                },
                Value::Error {
                    name: bn,
                    message: bm,
                },
            ) => an == bn && am == bm,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Value::Object(fields)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_equals_nan() {
        assert_eq!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn negative_zero_is_distinct() {
        assert_ne!(Value::Number(0.0), Value::Number(-0.0));
    }

    #[test]
    fn number_and_date_differ() {
        assert_ne!(Value::Number(5.0), Value::Date(5.0));
    }

    #[test]
    fn object_builder_and_lookup() {
        let v = Value::object([("n", Value::from("a")), ("v", Value::from(1))]);
        assert_eq!(v.get("n"), Some(&Value::from("a")));
        assert_eq!(v.get("missing"), None);
        assert_eq!(Value::from(3).get("n"), None);
    }

    #[test]
    fn from_json_builds_nested_value() {
        let v = Value::from(serde_json::json!({ "a": [1, "x", null] }));
        let expected = Value::object([(
            "a",
            Value::Array(vec![Value::from(1), Value::from("x"), Value::Null]),
        )]);
        assert_eq!(v, expected);
    }

    #[test]
    fn to_json_tags_special_types() {
        let v = Value::Array(vec![
            Value::Date(10.0),
            Value::Binary(vec![1, 2]),
            Value::Number(f64::INFINITY),
            Value::Undefined,
        ]);
        assert_eq!(
            v.to_json(),
            serde_json::json!([{ "$date": 10.0 }, { "$binary": [1, 2] }, "inf", null])
        );
    }
}

//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, ranges, values and schema names that
//! satisfy the engine's validity rules.

use proptest::prelude::*;
use shelfdb_codec::Value;
use shelfdb_core::{Key, KeyRange};

/// Strategy for numeric keys drawn from a small domain, so generated sets
/// collide often enough to exercise overwrites.
pub fn small_number_key_strategy() -> impl Strategy<Value = Key> + Clone {
    (-20i32..20).prop_map(Key::from)
}

/// Strategy for scalar keys of every type.
pub fn scalar_key_strategy() -> impl Strategy<Value = Key> {
    prop_oneof![
        any::<f64>()
            .prop_filter("NaN is not a key", |n| !n.is_nan())
            .prop_map(Key::Number),
        (-1e12f64..1e12).prop_map(Key::Date),
        "[a-zA-Z0-9 ]{0,8}".prop_map(Key::String),
        prop::collection::vec(any::<u8>(), 0..6).prop_map(Key::Binary),
    ]
}

/// Strategy for arbitrary keys, including nested arrays.
pub fn key_strategy() -> impl Strategy<Value = Key> + Clone {
    scalar_key_strategy().prop_recursive(3, 16, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Key::Array)
    })
}

/// Strategy for valid ranges over `keys`: bounded, half-open and
/// single-key ranges with every open/closed combination.
pub fn key_range_strategy(keys: impl Strategy<Value = Key> + Clone) -> impl Strategy<Value = KeyRange> {
    prop_oneof![
        keys.clone().prop_map(KeyRange::only),
        (keys.clone(), any::<bool>()).prop_map(|(key, open)| KeyRange::lower_bound(key, open)),
        (keys.clone(), any::<bool>()).prop_map(|(key, open)| KeyRange::upper_bound(key, open)),
        (keys.clone(), keys, any::<bool>(), any::<bool>()).prop_map(|(a, b, lower_open, upper_open)| {
            let (lower, upper) = if a <= b { (a, b) } else { (b, a) };
            let closed = lower == upper;
            KeyRange::bound(lower, upper, lower_open && !closed, upper_open && !closed)
                .expect("Ordered bounds form a valid range")
        }),
    ]
}

/// Strategy for record values: flat objects with a numeric `n` field plus
/// an optional label.
pub fn record_value_strategy() -> impl Strategy<Value = Value> {
    (any::<i32>(), prop::option::of("[a-z]{1,6}")).prop_map(|(n, label)| {
        let mut fields = vec![("n", Value::from(n))];
        if let Some(label) = label {
            fields.push(("label", Value::from(label)));
        }
        Value::object(fields)
    })
}

/// Strategy for arbitrary structured values, nested up to three levels.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Undefined),
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<f64>().prop_map(Value::Number),
        "[a-z]{0,8}".prop_map(Value::String),
        any::<f64>().prop_map(Value::Date),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Binary),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4).prop_map(Value::Object),
        ]
    })
}

/// Strategy for valid object store and index names.
pub fn store_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for valid single key paths: one to three dotted identifiers.
pub fn key_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z][a-z0-9_]{0,5}", 1..4).prop_map(|parts| parts.join("."))
}

/// A mutation applied to an out-of-line store.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// `put(value, key)`.
    Put(Key, Value),
    /// `delete(key)`.
    Delete(Key),
    /// `clear()`.
    Clear,
}

/// Strategy for mutation sequences over a small key domain.
pub fn mutations_strategy(max_len: usize) -> impl Strategy<Value = Vec<Mutation>> {
    let mutation = prop_oneof![
        6 => (small_number_key_strategy(), record_value_strategy())
            .prop_map(|(key, value)| Mutation::Put(key, value)),
        3 => small_number_key_strategy().prop_map(Mutation::Delete),
        1 => Just(Mutation::Clear),
    ];
    prop::collection::vec(mutation, 0..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfdb_core::is_valid_key;

    proptest! {
        #[test]
        fn generated_keys_are_valid(key in key_strategy()) {
            prop_assert!(is_valid_key(&key.to_value()));
        }

        #[test]
        fn generated_ranges_contain_their_bounds_when_closed(range in key_range_strategy(small_number_key_strategy())) {
            if let Some(lower) = range.lower() {
                prop_assert_eq!(range.includes(lower), !range.lower_open());
            }
            if let Some(upper) = range.upper() {
                prop_assert_eq!(range.includes(upper), !range.upper_open());
            }
        }

        #[test]
        fn store_names_are_nonempty(name in store_name_strategy()) {
            prop_assert!(!name.is_empty());
        }
    }
}

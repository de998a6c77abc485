//! # ShelfDB Codec
//!
//! The structured value model and its string serialization.
//!
//! Object-store payloads are [`Value`] trees. Before a payload reaches a
//! persistence backend it is turned into a string by a [`Codec`]; the
//! default [`SerialCodec`] writes an arena document (see [`serial`]) that
//! preserves every number exactly, including `NaN`, infinities and `-0`,
//! and keeps dates, binary buffers and error objects distinct from plain
//! numbers, arrays and objects.
//!
//! ## Usage
//!
//! ```
//! use shelfdb_codec::{Codec, SerialCodec, Value};
//!
//! let value = Value::object([("v", Value::from(1))]);
//! let text = SerialCodec.encode(&value).unwrap();
//! assert_eq!(SerialCodec.decode(&text).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod serial;
mod value;

pub use error::{CodecError, CodecResult};
pub use serial::{decode, encode};
pub use value::Value;

/// Converts values to and from the strings handed to a storage backend.
pub trait Codec: Send + Sync {
    /// Encodes a value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented.
    fn encode(&self, value: &Value) -> CodecResult<String>;

    /// Decodes a string produced by [`Codec::encode`].
    ///
    /// # Errors
    ///
    /// Returns an error if the input is malformed.
    fn decode(&self, input: &str) -> CodecResult<Value>;
}

/// The default codec, backed by [`serial`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialCodec;

impl Codec for SerialCodec {
    fn encode(&self, value: &Value) -> CodecResult<String> {
        serial::encode(value)
    }

    fn decode(&self, input: &str) -> CodecResult<Value> {
        serial::decode(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Undefined),
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<f64>().prop_map(Value::Number),
            ".*".prop_map(Value::String),
            any::<f64>().prop_map(Value::Date),
            proptest::collection::vec(any::<u8>(), 0..8).prop_map(Value::Binary),
        ];
        leaf.prop_recursive(4, 32, 6, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                proptest::collection::btree_map(".{0,6}", inner, 0..6).prop_map(Value::Object),
            ]
        })
    }

    proptest! {
        #[test]
        fn serial_codec_preserves_values(value in arb_value()) {
            let text = SerialCodec.encode(&value).unwrap();
            prop_assert_eq!(SerialCodec.decode(&text).unwrap(), value);
        }
    }

    #[test]
    fn codec_is_object_safe() {
        let codec: Box<dyn Codec> = Box::new(SerialCodec);
        let text = codec.encode(&Value::Binary(vec![1, 2, 3])).unwrap();
        assert_eq!(codec.decode(&text).unwrap(), Value::Binary(vec![1, 2, 3]));
    }
}

//! Arena-based string serialization for [`Value`].
//!
//! A value is flattened into a document holding a root slot and a list of
//! numbered container nodes. Scalars live inline in slots; arrays, objects,
//! binaries and errors become nodes and are referenced by index. The encoder
//! numbers nodes in pre-order, so every reference made from inside node `i`
//! points to some node `j > i`. The decoder enforces that rule, which rules
//! out cycles, and rejects references past the end of the arena.
//!
//! The document itself is written with `serde_json`.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    root: Slot,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    nodes: Vec<Node>,
}

#[derive(Debug, Serialize, Deserialize)]
enum Slot {
    #[serde(rename = "u")]
    Undefined,
    #[serde(rename = "z")]
    Null,
    #[serde(rename = "t")]
    Bool(bool),
    #[serde(rename = "n")]
    Number(NumberRepr),
    #[serde(rename = "s")]
    String(String),
    #[serde(rename = "d")]
    Date(NumberRepr),
    #[serde(rename = "r")]
    Ref(usize),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "k")]
enum Node {
    #[serde(rename = "a")]
    Array { items: Vec<Slot> },
    #[serde(rename = "o")]
    Object { fields: Vec<(String, Slot)> },
    #[serde(rename = "B")]
    Binary { bytes: Vec<u8> },
    #[serde(rename = "E")]
    Error { name: String, message: String },
}

/// JSON has no literal for non-finite numbers or negative zero, so those are
/// written as strings.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum NumberRepr {
    Finite(f64),
    Special(String),
}

impl NumberRepr {
    fn from_f64(n: f64) -> Self {
        if n.is_nan() {
            NumberRepr::Special("NaN".to_string())
        } else if n == f64::INFINITY {
            NumberRepr::Special("Infinity".to_string())
        } else if n == f64::NEG_INFINITY {
            NumberRepr::Special("-Infinity".to_string())
        } else if n == 0.0 && n.is_sign_negative() {
            NumberRepr::Special("-0".to_string())
        } else {
            NumberRepr::Finite(n)
        }
    }

    fn to_f64(&self) -> CodecResult<f64> {
        match self {
            NumberRepr::Finite(n) => Ok(*n),
            NumberRepr::Special(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                "-0" => Ok(-0.0),
                _ => Err(CodecError::InvalidNumber { text: text.clone() }),
            },
        }
    }
}

struct Encoder {
    nodes: Vec<Node>,
}

impl Encoder {
    fn slot(&mut self, value: &Value) -> Slot {
        match value {
            Value::Undefined => Slot::Undefined,
            Value::Null => Slot::Null,
            Value::Bool(b) => Slot::Bool(*b),
            Value::Number(n) => Slot::Number(NumberRepr::from_f64(*n)),
            Value::String(s) => Slot::String(s.clone()),
            Value::Date(ms) => Slot::Date(NumberRepr::from_f64(*ms)),
            Value::Binary(bytes) => self.push(Node::Binary {
                bytes: bytes.clone(),
            }),
            Value::Error { name, message } => self.push(Node::Error {
                name: name.clone(),
                message: message.clone(),
            }),
            Value::Array(items) => {
                let index = self.reserve();
                let slots = items.iter().map(|item| self.slot(item)).collect();
                self.nodes[index] = Node::Array { items: slots };
                Slot::Ref(index)
            }
            Value::Object(fields) => {
                let index = self.reserve();
                let slots = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.slot(v)))
                    .collect();
                self.nodes[index] = Node::Object { fields: slots };
                Slot::Ref(index)
            }
        }
    }

    fn push(&mut self, node: Node) -> Slot {
        self.nodes.push(node);
        Slot::Ref(self.nodes.len() - 1)
    }

    /// Claims the next index before the children are numbered.
    fn reserve(&mut self) -> usize {
        self.nodes.push(Node::Array { items: Vec::new() });
        self.nodes.len() - 1
    }
}

struct Decoder<'a> {
    nodes: &'a [Node],
}

impl Decoder<'_> {
    /// Decodes `slot`, found inside node `parent` (`None` for the root).
    fn slot(&self, slot: &Slot, parent: Option<usize>) -> CodecResult<Value> {
        Ok(match slot {
            Slot::Undefined => Value::Undefined,
            Slot::Null => Value::Null,
            Slot::Bool(b) => Value::Bool(*b),
            Slot::Number(n) => Value::Number(n.to_f64()?),
            Slot::String(s) => Value::String(s.clone()),
            Slot::Date(ms) => Value::Date(ms.to_f64()?),
            Slot::Ref(index) => {
                let index = *index;
                if parent.is_some_and(|p| index <= p) {
                    return Err(CodecError::CyclicReference { index });
                }
                let node = self
                    .nodes
                    .get(index)
                    .ok_or(CodecError::DanglingReference { index })?;
                self.node(node, index)?
            }
        })
    }

    fn node(&self, node: &Node, index: usize) -> CodecResult<Value> {
        Ok(match node {
            Node::Array { items } => Value::Array(
                items
                    .iter()
                    .map(|item| self.slot(item, Some(index)))
                    .collect::<CodecResult<_>>()?,
            ),
            Node::Object { fields } => {
                let mut map = BTreeMap::new();
                for (k, v) in fields {
                    map.insert(k.clone(), self.slot(v, Some(index))?);
                }
                Value::Object(map)
            }
            Node::Binary { bytes } => Value::Binary(bytes.clone()),
            Node::Error { name, message } => Value::Error {
                name: name.clone(),
                message: message.clone(),
            },
        })
    }
}

/// Encodes a value to its string form.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if the document cannot be written.
pub fn encode(value: &Value) -> CodecResult<String> {
    let mut encoder = Encoder { nodes: Vec::new() };
    let root = encoder.slot(value);
    let doc = Document {
        root,
        nodes: encoder.nodes,
    };
    serde_json::to_string(&doc).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

/// Decodes a string produced by [`encode`].
///
/// # Errors
///
/// Returns an error if the input is malformed, contains an unknown number
/// form, or holds a dangling or cyclic node reference.
pub fn decode(input: &str) -> CodecResult<Value> {
    let doc: Document =
        serde_json::from_str(input).map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    Decoder { nodes: &doc.nodes }.slot(&doc.root, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: &Value) -> Value {
        decode(&encode(value).unwrap()).unwrap()
    }

    #[test]
    fn scalars_stay_inline() {
        let encoded = encode(&Value::from("x")).unwrap();
        assert_eq!(encoded, r#"{"root":{"s":"x"}}"#);
    }

    #[test]
    fn special_numbers_roundtrip() {
        for n in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.0, 0.0, 1.5] {
            assert_eq!(roundtrip(&Value::Number(n)), Value::Number(n));
        }
    }

    #[test]
    fn invalid_date_roundtrips() {
        assert_eq!(roundtrip(&Value::Date(f64::NAN)), Value::Date(f64::NAN));
    }

    #[test]
    fn nested_containers_roundtrip() {
        let value = Value::object([
            (
                "list",
                Value::Array(vec![
                    Value::Binary(vec![0, 255]),
                    Value::object([("deep", Value::Undefined)]),
                ]),
            ),
            (
                "err",
                Value::Error {
                    name: "TypeError".into(),
                    message: "bad".into(),
                },
            ),
            ("when", Value::Date(1_700_000_000_000.0)),
        ]);
        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn nodes_are_numbered_in_preorder() {
        let value = Value::Array(vec![Value::Array(vec![]), Value::Binary(vec![1])]);
        let encoded = encode(&value).unwrap();
        let doc: Document = serde_json::from_str(&encoded).unwrap();
        assert!(matches!(doc.root, Slot::Ref(0)));
        match &doc.nodes[0] {
            Node::Array { items } => {
                assert!(matches!(items[0], Slot::Ref(1)));
                assert!(matches!(items[1], Slot::Ref(2)));
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn self_reference_is_rejected() {
        let input = r#"{"root":{"r":0},"nodes":[{"k":"a","items":[{"r":0}]}]}"#;
        assert_eq!(decode(input), Err(CodecError::CyclicReference { index: 0 }));
    }

    #[test]
    fn backward_reference_is_rejected() {
        let input = r#"{"root":{"r":0},"nodes":[{"k":"a","items":[{"r":1}]},{"k":"a","items":[{"r":0}]}]}"#;
        assert_eq!(decode(input), Err(CodecError::CyclicReference { index: 0 }));
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let input = r#"{"root":{"r":3},"nodes":[]}"#;
        assert_eq!(decode(input), Err(CodecError::DanglingReference { index: 3 }));
    }

    #[test]
    fn shared_forward_reference_decodes_twice() {
        let input = r#"{"root":{"r":0},"nodes":[{"k":"a","items":[{"r":1},{"r":1}]},{"k":"B","bytes":[7]}]}"#;
        let expected = Value::Array(vec![Value::Binary(vec![7]), Value::Binary(vec![7])]);
        assert_eq!(decode(input).unwrap(), expected);
    }

    #[test]
    fn unknown_number_text_is_rejected() {
        let input = r#"{"root":{"n":"lots"}}"#;
        assert!(matches!(decode(input), Err(CodecError::InvalidNumber { .. })));
    }

    #[test]
    fn garbage_is_a_decoding_error() {
        assert!(matches!(
            decode("not json"),
            Err(CodecError::DecodingFailed { .. })
        ));
    }
}

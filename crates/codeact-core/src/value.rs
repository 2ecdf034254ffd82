//! Portable values: what crosses the sandbox boundary.
//!
//! Values produced inside an evaluation are single-threaded and may alias
//! each other. Everything handed to a tool, returned to the caller, or kept
//! in a [`SessionState`](crate::session::SessionState) is detached into a
//! [`Value`] first, which is owned, `Send`, and serialisable.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::pyfmt::{float_repr, str_repr};

/// A detached snippet value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Insertion-ordered key/value pairs.
    Dict(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Image(Arc<ImageData>),
    /// A value with no portable form, kept as its `repr`.
    Opaque(String),
}

impl Value {
    /// The snippet-visible type name (`int`, `str`, `image`, ...).
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Image(_) => "image",
            Value::Opaque(_) => "object",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&Arc<ImageData>> {
        match self {
            Value::Image(img) => Some(img),
            _ => None,
        }
    }

    /// Look up a key in a dict value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Python `repr()` of the value.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_repr(*f),
            Value::Str(s) => str_repr(s),
            Value::List(items) => format!("[{}]", join_reprs(items)),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!("({})", join_reprs(items)),
            Value::Dict(pairs) => {
                let inner: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Set(items) if items.is_empty() => "set()".to_string(),
            Value::Set(items) => format!("{{{}}}", join_reprs(items)),
            Value::Image(img) => img.to_string(),
            Value::Opaque(repr) => repr.clone(),
        }
    }
}

fn join_reprs(items: &[Value]) -> String {
    items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
}

/// Python `str()`: strings render bare, everything else as its repr.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            other => f.write_str(&other.repr()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<ImageData> for Value {
    fn from(v: ImageData) -> Self {
        Value::Image(Arc::new(v))
    }
}

/// Encoded image bytes plus the metadata a snippet may inspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    /// Encoding name, e.g. `png`.
    pub format: String,
    pub width: u32,
    pub height: u32,
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
}

impl ImageData {
    pub fn new(format: impl Into<String>, width: u32, height: u32, bytes: Vec<u8>) -> Self {
        Self {
            format: format.into(),
            width,
            height,
            bytes,
        }
    }
}

impl fmt::Display for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Image format={} size={}x{}>",
            self.format, self.width, self.height
        )
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr_follows_python() {
        let v = Value::List(vec![
            Value::Int(1),
            Value::Float(2.0),
            Value::Str("a".into()),
            Value::None,
            Value::Bool(true),
        ]);
        assert_eq!(v.repr(), "[1, 2.0, 'a', None, True]");
        assert_eq!(Value::Tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::Set(vec![]).repr(), "set()");
        assert_eq!(
            Value::Dict(vec![(Value::Str("k".into()), Value::Int(2))]).repr(),
            "{'k': 2}"
        );
    }

    #[test]
    fn test_display_renders_strings_bare() {
        assert_eq!(Value::Str("hi".into()).to_string(), "hi");
        assert_eq!(Value::List(vec![Value::Str("hi".into())]).to_string(), "['hi']");
    }

    #[test]
    fn test_dict_get_and_accessors() {
        let v = Value::Dict(vec![(Value::Str("n".into()), Value::Int(3))]);
        assert_eq!(v.get("n"), Some(&Value::Int(3)));
        assert_eq!(v.get("missing"), None);
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::Int(2).as_f64(), Some(2.0));
    }

    #[test]
    fn test_image_serde_roundtrip_uses_hex() {
        let img = Value::from(ImageData::new("png", 2, 3, vec![0xde, 0xad]));
        let json = serde_json::to_string(&img).unwrap();
        assert!(json.contains("dead"));
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(img, back);
    }
}

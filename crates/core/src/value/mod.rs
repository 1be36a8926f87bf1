//! Tagged value model used for every piece of data crossing the bus.
//!
//! A [`Value`] owns its children outright: lists and maps hold their entries
//! by value, so dropping a node releases the whole tree exactly once and no
//! caller can alias into a tree owned by the engine. Values handed out by the
//! engine are always copies.

use std::fmt;

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::{BusError, Result};

/// Requested representation when reading or observing a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    /// No data. Observers using this format only learn that the property
    /// may have changed.
    None,
    String,
    Flag,
    Int64,
    Double,
    /// The value in whatever shape it currently has.
    Node,
}

impl Format {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::String => "string",
            Self::Flag => "flag",
            Self::Int64 => "int64",
            Self::Double => "double",
            Self::Node => "node",
        }
    }
}

/// Discriminated union carried by commands, properties and events.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    None,
    String(String),
    Flag(bool),
    Int64(i64),
    Double(f64),
    List(Vec<Value>),
    /// Keyed entries. Keys are unique; read order is not guaranteed.
    Map(Vec<(String, Value)>),
    Bytes(Vec<u8>),
}

impl Value {
    /// Builds a map, keeping the last value for duplicated keys.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut map = Value::Map(Vec::new());
        for (key, value) in entries {
            map.insert(key, value);
        }
        map
    }

    /// Builds a list of string arguments, the usual shape of a command.
    pub fn args<S, I>(items: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        Value::List(items.into_iter().map(|s| Value::String(s.into())).collect())
    }

    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(data.into())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// The natural format of this value. Structured values read as
    /// [`Format::Node`].
    pub fn format(&self) -> Format {
        match self {
            Value::None => Format::None,
            Value::String(_) => Format::String,
            Value::Flag(_) => Format::Flag,
            Value::Int64(_) => Format::Int64,
            Value::Double(_) => Format::Double,
            Value::List(_) | Value::Map(_) | Value::Bytes(_) => Format::Node,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to doubles.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Int64(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up a key when this value is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Inserts or replaces a map entry. Returns the previous value. Does
    /// nothing on non-map values.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let Value::Map(entries) = self else {
            return None;
        };
        let key = key.into();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                entries.push((key, value));
                None
            }
        }
    }

    /// Converts into the requested format.
    ///
    /// `Node` returns the value unchanged and `Int64` always widens to
    /// `Double`. Strings are formatted from scalars (flags as `yes`/`no`)
    /// and structured values are rendered as JSON text. Strings parse into
    /// flags and numbers. Anything else is [`BusError::UnsupportedFormat`].
    pub fn convert(&self, format: Format) -> Result<Value> {
        match (format, self) {
            (Format::Node, value) => Ok(value.clone()),
            (Format::None, _) => Ok(Value::None),
            (Format::String, value) => value.format_string().map(Value::String),
            (Format::Flag, Value::Flag(b)) => Ok(Value::Flag(*b)),
            (Format::Flag, Value::String(s)) => parse_flag(s).map(Value::Flag),
            (Format::Int64, Value::Int64(i)) => Ok(Value::Int64(*i)),
            (Format::Int64, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int64)
                .map_err(|_| BusError::UnsupportedFormat),
            (Format::Double, Value::Double(d)) => Ok(Value::Double(*d)),
            (Format::Double, Value::Int64(i)) => Ok(Value::Double(*i as f64)),
            (Format::Double, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| BusError::UnsupportedFormat),
            _ => Err(BusError::UnsupportedFormat),
        }
    }

    fn format_string(&self) -> Result<String> {
        match self {
            Value::None => Err(BusError::UnsupportedFormat),
            Value::String(s) => Ok(s.clone()),
            Value::Flag(b) => Ok(if *b { "yes" } else { "no" }.to_string()),
            Value::Int64(i) => Ok(i.to_string()),
            Value::Double(d) => Ok(format!("{d:.6}")),
            Value::List(_) | Value::Map(_) | Value::Bytes(_) => {
                serde_json::to_string(self).map_err(|_| BusError::Generic)
            }
        }
    }

    /// Renders as a `serde_json` value. Non-finite doubles become `null`
    /// and byte blobs become arrays of numbers.
    ///
    /// The conversion is lossy for blobs: JSON has no byte type, so reading
    /// the result back yields a [`Value::List`] of [`Value::Int64`].
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::None => Json::Null,
            Value::String(s) => Json::String(s.clone()),
            Value::Flag(b) => Json::Bool(*b),
            Value::Int64(i) => Json::from(*i),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Bytes(data) => Json::Array(data.iter().map(|b| Json::from(*b)).collect()),
        }
    }
}

fn parse_flag(text: &str) -> Result<bool> {
    match text.trim() {
        "yes" | "true" => Ok(true),
        "no" | "false" => Ok(false),
        _ => Err(BusError::UnsupportedFormat),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Flag(a), Value::Flag(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            // Key order carries no meaning.
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| other.get(k) == Some(v))
            }
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.format_string() {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<none>"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Flag(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int64(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => Value::None,
            Json::Bool(b) => Value::Flag(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int64(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(entries) => Value::map(entries.into_iter().map(|(k, v)| (k, Value::from(v)))),
        }
    }
}

/// Natural JSON shape for text formats. [`Value::Bytes`] goes through
/// `serialize_bytes`, which self-describing formats such as JSON write as an
/// integer array; deserializing that yields a list, not a blob.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::None => serializer.serialize_unit(),
            Value::String(s) => serializer.serialize_str(s),
            Value::Flag(b) => serializer.serialize_bool(*b),
            Value::Int64(i) => serializer.serialize_i64(*i),
            Value::Double(d) => serializer.serialize_f64(*d),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Value::Bytes(data) => serializer.serialize_bytes(data),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a bus value")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::None)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::None)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Flag(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int64(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        Ok(match i64::try_from(v) {
            Ok(i) => Value::Int64(i),
            Err(_) => Value::Double(v as f64),
        })
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Value::Double(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<Value, E> {
        Ok(Value::Bytes(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<Value, E> {
        Ok(Value::Bytes(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Value, A::Error> {
        let mut map = Value::Map(Vec::new());
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            map.insert(key, value);
        }
        Ok(map)
    }
}

//! In-memory value model for stored documents.
//!
//! Stored data is kept as [`Value`] rather than raw `serde_json::Value` so that a
//! cross-collection pointer is a distinct variant ([`Value::Reference`]) and can
//! never be confused with a user object that happens to look like one. JSON is
//! only the boundary format: user input is converted with [`Value::from_json`]
//! (which never produces references), while files written by the storage layer
//! are read back with [`Value::from_stored`], which recognises the marker shape.

use indexmap::IndexMap;
use std::cmp::Ordering;

/// Ordered field map used for documents and nested objects.
pub type Map = IndexMap<String, Value>;

/// Key under which a reference marker is encoded in the stored JSON form.
pub const REF_KEY: &str = "_ref";

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Object(Map),
    Reference(Reference),
}

/// A pointer to a document in another collection, expanded only at read time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub collection: String,
    pub id: String,
}

impl Reference {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Reference {
            collection: collection.into(),
            id: id.into(),
        }
    }

    fn to_stored(&self) -> serde_json::Value {
        serde_json::json!({
            REF_KEY: { "collection": self.collection, "id": self.id }
        })
    }

    fn from_stored(map: &serde_json::Map<String, serde_json::Value>) -> Option<Self> {
        if map.len() != 1 {
            return None;
        }
        let inner = map.get(REF_KEY)?.as_object()?;
        if inner.len() != 2 {
            return None;
        }
        let collection = inner.get("collection")?.as_str()?;
        let id = inner.get("id")?.as_str()?;
        Some(Reference::new(collection, id))
    }
}

impl Value {
    /// Convert user-supplied JSON. Never yields [`Value::Reference`].
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert JSON read back from persisted storage, decoding reference markers.
    pub fn from_stored(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_stored).collect())
            }
            serde_json::Value::Object(map) => {
                if let Some(reference) = Reference::from_stored(&map) {
                    return Value::Reference(reference);
                }
                Value::Object(
                    map.into_iter()
                        .map(|(k, v)| (k, Value::from_stored(v)))
                        .collect(),
                )
            }
            other => Value::from_json(other),
        }
    }

    /// Encode into the persisted JSON form (references become markers).
    pub fn to_stored(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_stored).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_stored())).collect(),
            ),
            Value::Reference(r) => r.to_stored(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Reference(_) => "reference",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Build a number value, preferring an integer representation when lossless.
    pub fn from_f64(n: f64) -> Value {
        if n.is_finite() && n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
            return Value::Number(serde_json::Number::from(n as i64));
        }
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Number(serde_json::Number::from(0)))
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

/// Loose equality used by queries, change detection and uniqueness checks.
/// Numbers compare by numeric value (`1` equals `1.0`); everything else is structural.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Ordering for range operators. Only numbers with numbers and strings with
/// strings are comparable; any other pairing yields `None` (no match).
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

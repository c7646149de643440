//! Plain-JSON form of `Value` used by the declaration, condition and filter
//! wire records. Temporal values travel as their canonical text and are
//! re-typed by field-kind coercion on arrival.

use crate::value::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Render a value as plain JSON.
#[must_use]
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(v) => serde_json::Value::Bool(*v),
        Value::Int(v) => serde_json::Value::from(*v),
        Value::Float(v) => serde_json::Number::from_f64(*v)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Text(v) => serde_json::Value::String(v.clone()),
        Value::Date(_) | Value::DateTime(_) | Value::Time(_) => {
            serde_json::Value::String(value.to_text())
        }
        Value::List(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Json(v) => v.clone(),
        Value::Blob(bytes) => {
            serde_json::Value::Array(bytes.iter().map(|b| serde_json::Value::from(*b)).collect())
        }
    }
}

/// Read a value from plain JSON; objects stay structured payloads.
#[must_use]
pub fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(v) => Value::Bool(v),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map_or_else(|| n.as_f64().map_or(Value::Null, Value::Float), Value::Int),
        serde_json::Value::String(s) => Value::Text(s),
        serde_json::Value::Array(items) => Value::List(items.into_iter().map(from_json).collect()),
        object @ serde_json::Value::Object(_) => Value::Json(object),
    }
}

pub(crate) fn serialize<S: Serializer>(value: &Value, serializer: S) -> Result<S::Ok, S::Error> {
    to_json(value).serialize(serializer)
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
    serde_json::Value::deserialize(deserializer).map(from_json)
}

pub(crate) mod option {
    use super::{from_json, to_json};
    use crate::value::Value;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub(crate) fn serialize<S: Serializer>(
        value: &Option<Value>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value.as_ref().map(to_json).serialize(serializer)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Value>, D::Error> {
        Option::<serde_json::Value>::deserialize(deserializer)
            .map(|json| json.map(from_json).filter(|v| !v.is_null()))
    }
}

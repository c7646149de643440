//! Module: db::codec
//! Responsibility: per-kind mapping between runtime `Value`s and storage
//! scalars, plus the side-channel blob format.
//! Does not own: which fields are persisted where (see `model::structure`).

use crate::{
    db::storage::SqlValue,
    error::{ErrorOrigin, InternalError},
    model::field::FieldKind,
    serialize,
    value::{DATE_FORMAT, DATETIME_FORMAT, TIME_FORMAT, Value},
};
use std::collections::BTreeMap;

/// Decoded content of the side-channel blob.
pub type MetadataMap = BTreeMap<String, Value>;

/// Encode one field value for a bound parameter.
pub fn encode(kind: FieldKind, value: &Value) -> Result<SqlValue, InternalError> {
    if kind.is_multi_valued() {
        return match value {
            Value::Null => Ok(SqlValue::Text("[]".to_string())),
            Value::List(items) => encode_list(items).map(SqlValue::Text),
            single => encode_list(std::slice::from_ref(single)).map(SqlValue::Text),
        };
    }

    Ok(encode_scalar(value))
}

/// Storage scalar for one value, independent of field kind.
#[must_use]
pub fn encode_scalar(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(v) => SqlValue::Integer(i64::from(*v)),
        Value::Int(v) => SqlValue::Integer(*v),
        Value::Float(v) => SqlValue::Real(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
        Value::Date(v) => SqlValue::Text(v.format(DATE_FORMAT).to_string()),
        Value::DateTime(v) => SqlValue::Text(v.format(DATETIME_FORMAT).to_string()),
        Value::Time(v) => SqlValue::Text(v.format(TIME_FORMAT).to_string()),
        Value::List(items) => {
            SqlValue::Text(encode_list(items).unwrap_or_else(|_| "[]".to_string()))
        }
        Value::Json(v) => SqlValue::Text(v.to_string()),
        Value::Blob(v) => SqlValue::Blob(v.clone()),
    }
}

/// Compact JSON token of one list element, as it appears inside an encoded
/// multi-valued column.
pub fn encode_element(value: &Value) -> Result<String, InternalError> {
    serde_json::to_string(&element_json(value)).map_err(|err| {
        InternalError::corruption(ErrorOrigin::Storage, format!("unencodable element: {err}"))
    })
}

/// Decode one column value into the field's canonical value.
pub fn decode(kind: FieldKind, raw: SqlValue) -> Result<Value, InternalError> {
    let value = match raw {
        SqlValue::Null => return Ok(kind.empty_value()),
        SqlValue::Integer(v) => Value::Int(v),
        SqlValue::Real(v) => Value::Float(v),
        SqlValue::Text(v) => Value::Text(v),
        SqlValue::Blob(v) => Value::Blob(v),
    };

    let value = match (kind, value) {
        (FieldKind::Boolean, Value::Int(v)) => Value::Bool(v != 0),
        (kind, Value::Text(text)) if kind.is_multi_valued() => decode_list(&text)?,
        (_, value) => value,
    };

    kind.coerce(value).map_err(|err| {
        InternalError::corruption(ErrorOrigin::Storage, format!("undecodable {kind:?} column: {err}"))
    })
}

/// Serialize side-channel values into the blob column.
pub fn encode_metadata(map: &MetadataMap) -> Result<Vec<u8>, InternalError> {
    Ok(serialize::serialize(map)?)
}

/// Decode the blob column; an empty blob is an empty map.
pub fn decode_metadata(raw: &SqlValue) -> Result<MetadataMap, InternalError> {
    match raw {
        SqlValue::Blob(bytes) if !bytes.is_empty() => Ok(serialize::deserialize(bytes)?),
        SqlValue::Null | SqlValue::Blob(_) => Ok(MetadataMap::new()),
        other => Err(InternalError::corruption(
            ErrorOrigin::Storage,
            format!("metadata column holds {other:?}"),
        )),
    }
}

fn encode_list(items: &[Value]) -> Result<String, InternalError> {
    let json: Vec<serde_json::Value> = items.iter().map(element_json).collect();

    serde_json::to_string(&json).map_err(|err| {
        InternalError::corruption(ErrorOrigin::Storage, format!("unencodable list: {err}"))
    })
}

fn element_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Int(v) => serde_json::Value::from(*v),
        Value::Json(v) => v.clone(),
        other => serde_json::Value::String(other.to_text()),
    }
}

fn decode_list(text: &str) -> Result<Value, InternalError> {
    if text.trim().is_empty() {
        return Ok(Value::List(Vec::new()));
    }
    let items: Vec<serde_json::Value> = serde_json::from_str(text).map_err(|err| {
        InternalError::corruption(ErrorOrigin::Storage, format!("malformed list column: {err}"))
    })?;

    Ok(Value::List(
        items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => Value::Text(s),
                serde_json::Value::Number(n) => n
                    .as_i64()
                    .map_or_else(|| n.as_f64().map_or(Value::Null, Value::Float), Value::Int),
                serde_json::Value::Null => Value::Null,
                other => Value::Json(other),
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn multi_values_encode_as_compact_json() {
        let tags = Value::List(vec!["a".into(), "b,c".into()]);

        assert_eq!(
            encode(FieldKind::Array, &tags).expect("encode"),
            SqlValue::Text(r#"["a","b,c"]"#.to_string())
        );
        assert_eq!(
            encode(FieldKind::ReferenceMulti, &Value::List(vec![3.into(), 12.into()]))
                .expect("encode"),
            SqlValue::Text("[3,12]".to_string())
        );
        assert_eq!(
            encode(FieldKind::Array, &Value::Null).expect("encode"),
            SqlValue::Text("[]".to_string())
        );
        assert_eq!(encode_element(&"x".into()).expect("element"), "\"x\"");
    }

    #[test]
    fn decode_restores_canonical_values() {
        assert_eq!(
            decode(FieldKind::Boolean, SqlValue::Integer(1)).expect("bool"),
            Value::Bool(true)
        );
        assert_eq!(
            decode(FieldKind::Boolean, SqlValue::Null).expect("bool"),
            Value::Bool(false)
        );
        assert_eq!(
            decode(FieldKind::Date, SqlValue::Text("2024-02-29".into())).expect("date"),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).expect("date"))
        );
        assert_eq!(
            decode(FieldKind::DateTime, SqlValue::Text("2024-02-29 10:11:12".into()))
                .expect("datetime"),
            Value::DateTime(
                Utc.with_ymd_and_hms(2024, 2, 29, 10, 11, 12)
                    .single()
                    .expect("instant")
            )
        );
        assert_eq!(
            decode(FieldKind::ReferenceMulti, SqlValue::Text("[3,12]".into())).expect("refs"),
            Value::List(vec![3.into(), 12.into()])
        );
        assert_eq!(
            decode(FieldKind::Number, SqlValue::Integer(5)).expect("number"),
            Value::Float(5.0)
        );
    }

    #[test]
    fn malformed_columns_are_corruption() {
        let err = decode(FieldKind::Date, SqlValue::Text("yesterday".into()))
            .expect_err("bad date should fail");

        assert_eq!(err.class, crate::error::ErrorClass::Corruption);
    }

    #[test]
    fn metadata_blob_round_trips() {
        let mut map = MetadataMap::new();
        map.insert("notes".into(), "urgent".into());
        map.insert("score".into(), Value::Float(2.5));

        let blob = encode_metadata(&map).expect("encode");
        let back = decode_metadata(&SqlValue::Blob(blob)).expect("decode");
        assert_eq!(back, map);
        assert!(decode_metadata(&SqlValue::Null).expect("null").is_empty());
    }
}

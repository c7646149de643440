use crate::{
    model::composite::Repetition,
    value::{DATE_FORMAT, DATETIME_FORMAT, TIME_FORMAT, Value, bag_equal, values_equal},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

///
/// FieldKind
///
/// Closed set of logical field types. Every per-kind decision (physical
/// column type, coercion, equality, query support) goes through
/// [`FieldKind::behavior`] or the methods below.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    // Identity
    Key,
    KeyText,

    // Text scalars
    Text,
    BigText,
    Email,
    Hyperlink,
    Color,
    Password,

    // Numeric scalars
    Integer,
    Float,
    Number,
    Boolean,

    // Temporal
    Date,
    DateTime,
    Time,

    // Enumerations
    Enumeration,
    EnumerationMulti,

    // Collections
    Array,

    // References
    Reference,
    ReferenceMulti,
    PolymorphicReference,

    // Composites and their parts
    Currency,
    CurrencyCode,
    Address,
    Country,

    // Attachments
    File,
    Image,

    // Structured payloads
    Repetition,
    Object,

    /// Catch-all side-channel blob injected into every entity type.
    Metadata,
}

///
/// KindBehavior
/// Per-kind behavior row.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KindBehavior {
    /// Physical column type, `None` for composite parents.
    pub column_type: Option<&'static str>,
    pub multi_valued: bool,
    pub orderable: bool,
    pub text_searchable: bool,
    pub reference: bool,
    pub composite: bool,
    pub temporal: bool,
}

const fn row(column_type: &'static str) -> KindBehavior {
    KindBehavior {
        column_type: Some(column_type),
        multi_valued: false,
        orderable: false,
        text_searchable: false,
        reference: false,
        composite: false,
        temporal: false,
    }
}

const fn text_row(column_type: &'static str) -> KindBehavior {
    KindBehavior {
        orderable: true,
        text_searchable: true,
        ..row(column_type)
    }
}

const fn ordered_row(column_type: &'static str) -> KindBehavior {
    KindBehavior {
        orderable: true,
        ..row(column_type)
    }
}

const fn temporal_row(column_type: &'static str) -> KindBehavior {
    KindBehavior {
        orderable: true,
        temporal: true,
        ..row(column_type)
    }
}

const fn multi_row(reference: bool) -> KindBehavior {
    KindBehavior {
        multi_valued: true,
        reference,
        ..row("TEXT")
    }
}

const fn composite_row(reference: bool) -> KindBehavior {
    KindBehavior {
        column_type: None,
        composite: true,
        reference,
        ..row("")
    }
}

impl FieldKind {
    /// Behavior table for this kind.
    #[must_use]
    pub const fn behavior(self) -> KindBehavior {
        match self {
            Self::Key => ordered_row("INTEGER"),
            Self::KeyText => text_row("VARCHAR(128)"),
            Self::Text | Self::Email | Self::Hyperlink | Self::Enumeration => {
                text_row("VARCHAR(255)")
            }
            Self::BigText => text_row("TEXT"),
            Self::Color => text_row("VARCHAR(9)"),
            Self::CurrencyCode => text_row("VARCHAR(3)"),
            Self::Country => text_row("VARCHAR(2)"),
            Self::Password => row("VARCHAR(255)"),
            Self::Integer => ordered_row("INTEGER"),
            Self::Float | Self::Number => ordered_row("REAL"),
            Self::Boolean => row("TINYINT"),
            Self::Date => temporal_row("DATE"),
            Self::DateTime => temporal_row("DATETIME"),
            Self::Time => temporal_row("TIME"),
            Self::EnumerationMulti | Self::Array => multi_row(false),
            Self::ReferenceMulti => multi_row(true),
            Self::Reference => KindBehavior {
                reference: true,
                ..row("INTEGER")
            },
            Self::PolymorphicReference => composite_row(true),
            Self::Currency | Self::Address => composite_row(false),
            Self::File | Self::Image => row("INTEGER"),
            Self::Repetition | Self::Object => row("TEXT"),
            Self::Metadata => row("BLOB"),
        }
    }

    #[must_use]
    pub const fn column_type(self) -> Option<&'static str> {
        self.behavior().column_type
    }

    #[must_use]
    pub const fn is_multi_valued(self) -> bool {
        self.behavior().multi_valued
    }

    #[must_use]
    pub const fn is_composite(self) -> bool {
        self.behavior().composite
    }

    #[must_use]
    pub const fn is_reference(self) -> bool {
        self.behavior().reference
    }

    #[must_use]
    pub const fn is_key(self) -> bool {
        matches!(self, Self::Key | Self::KeyText)
    }

    #[must_use]
    pub const fn is_enumeration(self) -> bool {
        matches!(self, Self::Enumeration | Self::EnumerationMulti)
    }

    #[must_use]
    pub const fn is_attachment(self) -> bool {
        matches!(self, Self::File | Self::Image)
    }

    /// Kind of one element of a multi-valued field.
    #[must_use]
    pub const fn element_kind(self) -> Self {
        match self {
            Self::EnumerationMulti => Self::Enumeration,
            Self::Array => Self::Text,
            Self::ReferenceMulti => Self::Reference,
            other => other,
        }
    }

    /// Value representing "nothing set" for this kind.
    #[must_use]
    pub const fn empty_value(self) -> Value {
        match self {
            Self::Boolean => Value::Bool(false),
            Self::EnumerationMulti | Self::Array | Self::ReferenceMulti => Value::List(Vec::new()),
            _ => Value::Null,
        }
    }

    /// Normalize a value into this kind's canonical representation.
    pub fn coerce(self, value: Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(self.empty_value());
        }

        match self {
            Self::Key | Self::Integer | Self::File | Self::Image => coerce_int(value),
            Self::KeyText
            | Self::Text
            | Self::BigText
            | Self::Email
            | Self::Hyperlink
            | Self::Color
            | Self::Password
            | Self::Enumeration
            | Self::CurrencyCode
            | Self::Country => coerce_text(value),
            Self::Float | Self::Number => coerce_float(value),
            Self::Boolean => coerce_bool(value),
            Self::Date => coerce_date(value),
            Self::DateTime => coerce_datetime(value),
            Self::Time => coerce_time(value),
            Self::EnumerationMulti | Self::Array | Self::ReferenceMulti => {
                let element = self.element_kind();
                let items = match value {
                    Value::List(items) => items,
                    single => vec![single],
                };
                items
                    .into_iter()
                    .filter(|item| !item.is_null())
                    .map(|item| element.coerce(item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            }
            Self::Reference => coerce_reference(value),
            Self::Repetition => {
                let json = coerce_json(value)?;
                if let Value::Json(raw) = &json {
                    serde_json::from_value::<Repetition>(raw.clone())
                        .map_err(|err| format!("invalid repetition: {err}"))?;
                }
                Ok(json)
            }
            Self::Object => coerce_json(value),
            Self::Metadata => match value {
                Value::Blob(bytes) => Ok(Value::Blob(bytes)),
                other => Err(format!("expected blob, found {other:?}")),
            },
            Self::PolymorphicReference | Self::Currency | Self::Address => {
                Err("composite fields are set through their accessor".to_string())
            }
        }
    }

    /// Field-type-aware equality used for dirty diffing.
    ///
    /// Multi-valued kinds compare as unordered bags; temporal kinds compare
    /// by resolved instant.
    #[must_use]
    pub fn same_value(self, left: &Value, right: &Value) -> bool {
        if self.is_multi_valued() {
            let empty: &[Value] = &[];
            let left = if left.is_null() { Some(empty) } else { left.as_list() };
            let right = if right.is_null() { Some(empty) } else { right.as_list() };

            return match (left, right) {
                (Some(a), Some(b)) => bag_equal(a, b),
                _ => false,
            };
        }

        match (left, right) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::DateTime(a), Value::DateTime(b)) => a.timestamp() == b.timestamp(),
            _ => values_equal(left, right),
        }
    }
}

// ---- coercion helpers ---------------------------------------------------

fn coerce_int(value: Value) -> Result<Value, String> {
    match value {
        Value::Int(v) => Ok(Value::Int(v)),
        Value::Float(v) if v.fract() == 0.0 && v.is_finite() => Ok(Value::Int(float_to_int(v))),
        Value::Text(text) => text
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| format!("'{text}' is not an integer")),
        other => Err(format!("expected integer, found {other:?}")),
    }
}

#[expect(clippy::cast_possible_truncation)]
const fn float_to_int(v: f64) -> i64 {
    v as i64
}

fn coerce_text(value: Value) -> Result<Value, String> {
    match value {
        Value::Text(text) => Ok(Value::Text(text)),
        Value::Int(_) | Value::Float(_) => Ok(Value::Text(value.to_text())),
        other => Err(format!("expected text, found {other:?}")),
    }
}

fn coerce_float(value: Value) -> Result<Value, String> {
    match value {
        Value::Float(v) if v.is_finite() => Ok(Value::Float(v)),
        Value::Int(_) => value
            .as_float()
            .map(Value::Float)
            .ok_or_else(|| "expected number".to_string()),
        Value::Text(text) => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Value::Float)
            .ok_or_else(|| format!("'{text}' is not a number")),
        other => Err(format!("expected number, found {other:?}")),
    }
}

fn coerce_bool(value: Value) -> Result<Value, String> {
    match value {
        Value::Bool(v) => Ok(Value::Bool(v)),
        Value::Int(0) => Ok(Value::Bool(false)),
        Value::Int(1) => Ok(Value::Bool(true)),
        Value::Text(text) => match text.trim() {
            "1" | "true" => Ok(Value::Bool(true)),
            "0" | "false" | "" => Ok(Value::Bool(false)),
            _ => Err(format!("'{text}' is not a boolean")),
        },
        other => Err(format!("expected boolean, found {other:?}")),
    }
}

fn coerce_date(value: Value) -> Result<Value, String> {
    match value {
        Value::Date(v) => Ok(Value::Date(v)),
        Value::DateTime(v) => Ok(Value::Date(v.date_naive())),
        Value::Text(text) => parse_date(&text).map(Value::Date),
        other => Err(format!("expected date, found {other:?}")),
    }
}

fn coerce_datetime(value: Value) -> Result<Value, String> {
    match value {
        Value::DateTime(v) => Ok(Value::DateTime(truncate_seconds(v))),
        Value::Date(v) => Ok(Value::DateTime(v.and_time(NaiveTime::MIN).and_utc())),
        Value::Text(text) => parse_datetime(&text).map(Value::DateTime),
        other => Err(format!("expected datetime, found {other:?}")),
    }
}

fn coerce_time(value: Value) -> Result<Value, String> {
    match value {
        Value::Time(v) => Ok(Value::Time(v.with_nanosecond(0).unwrap_or(v))),
        Value::Text(text) => NaiveTime::parse_from_str(text.trim(), TIME_FORMAT)
            .map(Value::Time)
            .map_err(|_| format!("'{text}' is not a time")),
        other => Err(format!("expected time, found {other:?}")),
    }
}

fn coerce_reference(value: Value) -> Result<Value, String> {
    match value {
        Value::Int(v) => Ok(Value::Int(v)),
        Value::Text(text) => Ok(text
            .trim()
            .parse::<i64>()
            .map_or(Value::Text(text), Value::Int)),
        other => Err(format!("expected reference key, found {other:?}")),
    }
}

fn coerce_json(value: Value) -> Result<Value, String> {
    match value {
        Value::Json(raw) => Ok(Value::Json(raw)),
        Value::Text(text) => serde_json::from_str(&text)
            .map(Value::Json)
            .map_err(|err| format!("invalid json: {err}")),
        other => Err(format!("expected json, found {other:?}")),
    }
}

pub(crate) fn parse_date(text: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).map_err(|_| format!("'{text}' is not a date"))
}

pub(crate) fn parse_datetime(text: &str) -> Result<DateTime<Utc>, String> {
    let text = text.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, DATETIME_FORMAT) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(text)
        .map(|v| truncate_seconds(v.with_timezone(&Utc)))
        .map_err(|_| format!("'{text}' is not a datetime"))
}

fn truncate_seconds(value: DateTime<Utc>) -> DateTime<Utc> {
    value.with_nanosecond(0).unwrap_or(value)
}

//! Scalar values shared by the query IR, the formatter, and the executor,
//! plus the Hive wire types they are read and written as.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

/// Typed value tagged with explicit type information so serialized query
/// trees remain unambiguous.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Null literal.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Signed 64-bit integer literal.
    Int(i64),
    /// 64-bit floating point literal.
    Float(f64),
    /// UTF-8 string literal.
    String(String),
    /// Arbitrary binary payload represented as bytes.
    Bytes(Vec<u8>),
    /// Nanoseconds since Unix epoch in UTC.
    #[serde(deserialize_with = "serde_datetime::deserialize")]
    DateTime(i128),
}

mod serde_datetime {
    use serde::de::{self, Deserializer, Visitor};
    use std::fmt;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i128, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DateTimeVisitor;

        impl<'de> Visitor<'de> for DateTimeVisitor {
            type Value = i128;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("nanoseconds since Unix epoch or a Hive timestamp string")
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(value as i128)
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(value as i128)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if let Ok(nanos) = value.parse::<i128>() {
                    return Ok(nanos);
                }
                super::parse_timestamp(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DateTimeVisitor)
    }
}

/// Logical kind of a [`Value`], reported in parameter descriptors.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Null.
    Null,
    /// Boolean.
    Bool,
    /// Signed integer.
    Int,
    /// Floating point.
    Float,
    /// Text.
    String,
    /// Binary payload.
    Bytes,
    /// Timestamp.
    DateTime,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Bytes => "bytes",
            ValueKind::DateTime => "datetime",
        };
        f.write_str(name)
    }
}

/// Column types as the engine declares and transmits them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireType {
    /// BOOLEAN
    Boolean,
    /// TINYINT
    TinyInt,
    /// SMALLINT
    SmallInt,
    /// INT
    Int,
    /// BIGINT
    BigInt,
    /// FLOAT
    Float,
    /// DOUBLE
    Double,
    /// DECIMAL, materialized as a double.
    Decimal,
    /// STRING
    String,
    /// TIMESTAMP
    Timestamp,
    /// DATE
    Date,
    /// BINARY
    Binary,
}

impl WireType {
    /// Upper-case type name as written in HiveQL.
    pub fn hive_name(self) -> &'static str {
        match self {
            WireType::Boolean => "BOOLEAN",
            WireType::TinyInt => "TINYINT",
            WireType::SmallInt => "SMALLINT",
            WireType::Int => "INT",
            WireType::BigInt => "BIGINT",
            WireType::Float => "FLOAT",
            WireType::Double => "DOUBLE",
            WireType::Decimal => "DECIMAL",
            WireType::String => "STRING",
            WireType::Timestamp => "TIMESTAMP",
            WireType::Date => "DATE",
            WireType::Binary => "BINARY",
        }
    }

    /// Logical kind values of this wire type materialize as.
    pub fn kind(self) -> ValueKind {
        match self {
            WireType::Boolean => ValueKind::Bool,
            WireType::TinyInt | WireType::SmallInt | WireType::Int | WireType::BigInt => {
                ValueKind::Int
            }
            WireType::Float | WireType::Double | WireType::Decimal => ValueKind::Float,
            WireType::String => ValueKind::String,
            WireType::Timestamp | WireType::Date => ValueKind::DateTime,
            WireType::Binary => ValueKind::Bytes,
        }
    }

    /// True for the integral and floating point types.
    pub fn is_numeric(self) -> bool {
        matches!(self.kind(), ValueKind::Int | ValueKind::Float)
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hive_name())
    }
}

impl FromStr for WireType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s.trim().to_ascii_lowercase().as_str() {
            "boolean" | "bool" => WireType::Boolean,
            "tinyint" => WireType::TinyInt,
            "smallint" => WireType::SmallInt,
            "int" | "integer" => WireType::Int,
            "bigint" => WireType::BigInt,
            "float" => WireType::Float,
            "double" => WireType::Double,
            "decimal" => WireType::Decimal,
            "string" | "varchar" | "char" => WireType::String,
            "timestamp" => WireType::Timestamp,
            "date" => WireType::Date,
            "binary" => WireType::Binary,
            other => return Err(format!("unknown wire type '{other}'")),
        };
        Ok(ty)
    }
}

impl Value {
    /// Logical kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::DateTime(_) => ValueKind::DateTime,
        }
    }

    /// Wire type the engine would infer for a literal of this value.
    pub fn wire_type(&self) -> WireType {
        match self {
            Value::Null | Value::String(_) => WireType::String,
            Value::Bool(_) => WireType::Boolean,
            Value::Int(_) => WireType::BigInt,
            Value::Float(_) => WireType::Double,
            Value::Bytes(_) => WireType::Binary,
            Value::DateTime(_) => WireType::Timestamp,
        }
    }

    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Parses a textual field delivered by the engine into the value the
    /// column's wire type calls for.
    pub fn coerce_from_text(text: &str, wire: WireType) -> Result<Value, String> {
        let value = match wire {
            WireType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                other => return Err(format!("'{other}' is not a boolean")),
            },
            WireType::TinyInt | WireType::SmallInt | WireType::Int | WireType::BigInt => {
                Value::Int(
                    text.trim()
                        .parse::<i64>()
                        .map_err(|err| format!("'{text}' is not an integer: {err}"))?,
                )
            }
            WireType::Float | WireType::Double | WireType::Decimal => Value::Float(
                text.trim()
                    .parse::<f64>()
                    .map_err(|err| format!("'{text}' is not a number: {err}"))?,
            ),
            WireType::String => Value::String(text.to_owned()),
            WireType::Timestamp | WireType::Date => Value::DateTime(parse_timestamp(text)?),
            WireType::Binary => Value::Bytes(text.as_bytes().to_vec()),
        };
        Ok(value)
    }

    /// Converts an already-decoded value to the kind `wire` calls for.
    ///
    /// Text is parsed, integers widen to floats, and anything else must
    /// already have the right kind.
    pub fn coerce(self, wire: WireType) -> Result<Value, String> {
        match (self, wire.kind()) {
            (Value::Null, _) => Ok(Value::Null),
            (Value::String(text), kind) if kind != ValueKind::String => {
                Value::coerce_from_text(&text, wire)
            }
            (Value::Int(v), ValueKind::Float) => Ok(Value::Float(v as f64)),
            (Value::Int(v), ValueKind::Bool) => Ok(Value::Bool(v != 0)),
            (value, kind) if value.kind() == kind => Ok(value),
            (value, kind) => Err(format!("{} value cannot be read as {kind}", value.kind())),
        }
    }

    /// Renders the value as plain text, as passed to `--hivevar` bindings.
    pub fn to_plain_text(&self) -> Result<String, String> {
        match self {
            Value::Null => Ok("NULL".to_owned()),
            Value::Bool(v) => Ok(if *v { "true" } else { "false" }.to_owned()),
            Value::Int(v) => Ok(v.to_string()),
            Value::Float(v) => Ok(format_float(*v)),
            Value::String(v) => Ok(v.clone()),
            Value::Bytes(_) => Err("binary values have no text form".to_owned()),
            Value::DateTime(nanos) => format_timestamp(*nanos),
        }
    }
}

/// Formats a float so that it always reads back as a floating point literal.
pub(crate) fn format_float(value: f64) -> String {
    let text = value.to_string();
    if text.contains(['.', 'e', 'E']) || !value.is_finite() {
        text
    } else {
        format!("{text}.0")
    }
}

/// Formats epoch nanoseconds as `YYYY-MM-DD HH:MM:SS[.fffffffff]` in UTC.
pub(crate) fn format_timestamp(nanos: i128) -> Result<String, String> {
    let moment = OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|err| format!("timestamp {nanos} out of range: {err}"))?;
    let base = moment
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .map_err(|err| err.to_string())?;
    let sub = moment.nanosecond();
    if sub == 0 {
        return Ok(base);
    }
    let fraction = format!("{sub:09}");
    Ok(format!("{base}.{}", fraction.trim_end_matches('0')))
}

/// Parses `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, or the same with a
/// fractional second into epoch nanoseconds (UTC).
pub(crate) fn parse_timestamp(text: &str) -> Result<i128, String> {
    let text = text.trim();
    let (main, fraction) = match text.split_once('.') {
        Some((main, fraction)) => (main, Some(fraction)),
        None => (text, None),
    };
    let stamp = if main.len() == 10 && fraction.is_none() {
        let date = Date::parse(main, format_description!("[year]-[month]-[day]"))
            .map_err(|err| format!("'{text}' is not a date: {err}"))?;
        PrimitiveDateTime::new(date, Time::MIDNIGHT)
    } else {
        PrimitiveDateTime::parse(
            main,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        )
        .map_err(|err| format!("'{text}' is not a timestamp: {err}"))?
    };
    let mut nanos = stamp.assume_utc().unix_timestamp_nanos();
    if let Some(fraction) = fraction {
        if fraction.is_empty() || fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(format!("'{text}' has an invalid fractional second"));
        }
        let scale = 10_i128.pow(9 - fraction.len() as u32);
        let digits: i128 = fraction
            .parse()
            .map_err(|err| format!("'{text}' has an invalid fractional second: {err}"))?;
        nanos += digits * scale;
    }
    Ok(nanos)
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_fields_follow_wire_type() {
        assert_eq!(
            Value::coerce_from_text("1994", WireType::Int),
            Ok(Value::Int(1994))
        );
        assert_eq!(
            Value::coerce_from_text("TRUE", WireType::Boolean),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            Value::coerce_from_text("2.5", WireType::Double),
            Ok(Value::Float(2.5))
        );
        assert!(Value::coerce_from_text("abc", WireType::BigInt).is_err());
    }

    #[test]
    fn timestamps_round_trip_through_text() {
        let nanos = parse_timestamp("2013-03-01 12:30:45.25").expect("parse");
        assert_eq!(
            format_timestamp(nanos).expect("format"),
            "2013-03-01 12:30:45.25"
        );
        let midnight = parse_timestamp("2013-03-01").expect("date");
        assert_eq!(
            format_timestamp(midnight).expect("format"),
            "2013-03-01 00:00:00"
        );
    }

    #[test]
    fn coerce_widens_and_rejects() {
        assert_eq!(Value::Int(3).coerce(WireType::Double), Ok(Value::Float(3.0)));
        assert_eq!(Value::Null.coerce(WireType::Int), Ok(Value::Null));
        assert!(Value::Bool(true).coerce(WireType::String).is_err());
    }

    #[test]
    fn floats_keep_a_decimal_point() {
        assert_eq!(format_float(2.0), "2.0");
        assert_eq!(format_float(0.125), "0.125");
    }

    #[test]
    fn wire_type_names_parse() {
        assert_eq!("BIGINT".parse::<WireType>(), Ok(WireType::BigInt));
        assert_eq!("varchar".parse::<WireType>(), Ok(WireType::String));
        assert!("struct".parse::<WireType>().is_err());
    }
}

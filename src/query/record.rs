//! Materialized result rows and conversion into caller types.

use serde_json::{Map, Number, Value as JsonValue};

use crate::query::value::{format_timestamp, Value};
use crate::types::{HiveError, Result};

/// One materialized result: projector members paired with their values, in
/// projector order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    /// Creates a record from member/value pairs.
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }

    /// Value of `member`, if present.
    pub fn get(&self, member: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == member)
            .map(|(_, value)| value)
    }

    /// Value of `member`, or [`HiveError::Invalid`] when absent.
    pub fn require(&self, member: &str) -> Result<&Value> {
        self.get(member)
            .ok_or(HiveError::Invalid("record has no such member"))
    }

    /// Member names in order.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Values in member order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, value)| value)
    }

    /// Member/value pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True for a record without members.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Consumes the record, returning its pairs.
    pub fn into_fields(self) -> Vec<(String, Value)> {
        self.fields
    }

    /// Plain JSON object; dotted member names nest.
    pub fn to_json(&self) -> JsonValue {
        let mut root = Map::new();
        for (member, value) in &self.fields {
            insert_path(&mut root, member, value_to_json(value));
        }
        JsonValue::Object(root)
    }
}

fn insert_path(map: &mut Map<String, JsonValue>, path: &str, value: JsonValue) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_owned(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_owned())
                .or_insert_with(|| JsonValue::Object(Map::new()));
            if let JsonValue::Object(inner) = entry {
                insert_path(inner, rest, value);
            }
        }
    }
}

/// Converts a value into untagged JSON for display.
pub fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(v) => JsonValue::Bool(*v),
        Value::Int(v) => JsonValue::Number((*v).into()),
        Value::Float(v) => Number::from_f64(*v).map_or(JsonValue::Null, JsonValue::Number),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Bytes(bytes) => JsonValue::Array(
            bytes
                .iter()
                .map(|b| JsonValue::Number((*b).into()))
                .collect(),
        ),
        Value::DateTime(nanos) => match format_timestamp(*nanos) {
            Ok(text) => JsonValue::String(text),
            Err(_) => JsonValue::String(nanos.to_string()),
        },
    }
}

/// Conversion from a materialized [`Record`].
pub trait FromRecord: Sized {
    /// Builds `Self` from one record.
    fn from_record(record: Record) -> Result<Self>;
}

impl FromRecord for Record {
    fn from_record(record: Record) -> Result<Self> {
        Ok(record)
    }
}

/// Scalar results: the single member's value.
impl FromRecord for Value {
    fn from_record(record: Record) -> Result<Self> {
        let mut fields = record.into_fields();
        match fields.len() {
            1 => Ok(fields.remove(0).1),
            _ => Err(HiveError::Invalid("scalar result must have exactly one member")),
        }
    }
}

/// A caller type bound to a mapped entity.
///
/// ```
/// use hiveq::query::{Entity, FromRecord, Record, Value};
///
/// struct Title {
///     name: String,
/// }
///
/// impl Entity for Title {
///     const ENTITY: &'static str = "titles";
/// }
///
/// impl FromRecord for Title {
///     fn from_record(record: Record) -> hiveq::types::Result<Self> {
///         match record.require("Name")? {
///             Value::String(name) => Ok(Title { name: name.clone() }),
///             _ => Err(hiveq::types::HiveError::Invalid("Name must be text")),
///         }
///     }
/// }
/// # let _ = Title { name: String::new() }.name;
/// ```
pub trait Entity: FromRecord {
    /// Entity name in the mapping.
    const ENTITY: &'static str;
}

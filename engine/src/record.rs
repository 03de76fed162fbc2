//! Record identity and document helpers.
//!
//! Records are stored as schemaless JSON objects ([`Document`]). Every
//! collection keys its rows by a primary key path whose value is a
//! [`RecordId`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A stored record: a JSON object.
pub type Document = serde_json::Map<String, Value>;

/// Field stamped with the modification time on every `put`.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Primary key of a record.
///
/// Ids are integers when generated by the store, but imported snapshots may
/// carry string ids, so both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// Read an id out of a JSON value.
    ///
    /// Integral floats (`7.0`) are treated as integers. Empty strings,
    /// booleans, objects and arrays are not valid ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(RecordId::Int(i))
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| RecordId::Int(f as i64))
                }
            }
            Value::String(s) if !s.is_empty() => Some(RecordId::Text(s.clone())),
            _ => None,
        }
    }

    /// Convert back into a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            RecordId::Int(i) => Value::from(*i),
            RecordId::Text(s) => Value::String(s.clone()),
        }
    }

    /// Read the id stored under `field` in a document.
    pub fn of(doc: &Document, field: &str) -> Option<Self> {
        doc.get(field).and_then(Self::from_value)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(i) => write!(f, "{}", i),
            RecordId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Int(value)
    }
}

impl From<i32> for RecordId {
    fn from(value: i32) -> Self {
        RecordId::Int(value.into())
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Text(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        RecordId::Text(value)
    }
}

impl From<RecordId> for Value {
    fn from(id: RecordId) -> Self {
        id.to_value()
    }
}

/// Overlay `patch` onto `base`, field by field. Nested objects are replaced,
/// not merged.
pub fn shallow_merge(base: &mut Document, patch: Document) {
    for (field, value) in patch {
        base.insert(field, value);
    }
}

/// Coerce a JSON value into a document, if it is an object.
pub fn into_document(value: Value) -> Option<Document> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_from_value() {
        assert_eq!(RecordId::from_value(&json!(7)), Some(RecordId::Int(7)));
        assert_eq!(RecordId::from_value(&json!(7.0)), Some(RecordId::Int(7)));
        assert_eq!(
            RecordId::from_value(&json!("r-1")),
            Some(RecordId::Text("r-1".into()))
        );
        assert_eq!(RecordId::from_value(&json!(7.5)), None);
        assert_eq!(RecordId::from_value(&json!("")), None);
        assert_eq!(RecordId::from_value(&json!(null)), None);
        assert_eq!(RecordId::from_value(&json!(true)), None);
    }

    #[test]
    fn id_serializes_untagged() {
        assert_eq!(serde_json::to_string(&RecordId::Int(3)).unwrap(), "3");
        assert_eq!(
            serde_json::to_string(&RecordId::from("abc")).unwrap(),
            "\"abc\""
        );
        let parsed: RecordId = serde_json::from_str("42").unwrap();
        assert_eq!(parsed, RecordId::Int(42));
    }

    #[test]
    fn display_is_bare() {
        assert_eq!(RecordId::Int(100).to_string(), "100");
        assert_eq!(RecordId::from("x").to_string(), "x");
    }

    #[test]
    fn shallow_merge_overwrites_top_level_only() {
        let mut base = into_document(json!({"id": 1, "name": "A", "meta": {"a": 1}})).unwrap();
        let patch = into_document(json!({"name": "B", "meta": {"b": 2}})).unwrap();
        shallow_merge(&mut base, patch);
        assert_eq!(
            Value::Object(base),
            json!({"id": 1, "name": "B", "meta": {"b": 2}})
        );
    }
}

//! Snapshot payloads for export and import.
//!
//! A snapshot is a JSON object from collection name to an array of that
//! collection's records. Unknown keys are ignored. A collection missing from
//! the snapshot is left untouched by an import.

use crate::error::{Result, ValidationError};
use crate::record::{into_document, Document};
use crate::schema::{Collection, SchemaRegistry};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Records of some or all collections.
///
/// Uses BTreeMap so collections serialize in dependency order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub collections: BTreeMap<Collection, Vec<Document>>,
}

fn malformed(location: impl Into<String>, reason: impl Into<String>) -> ValidationError {
    ValidationError::MalformedSnapshot {
        location: location.into(),
        reason: reason.into(),
    }
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection: Collection, records: Vec<Document>) {
        self.collections.insert(collection, records);
    }

    pub fn get(&self, collection: Collection) -> Option<&[Document]> {
        self.collections.get(&collection).map(Vec::as_slice)
    }

    /// Total records across all collections.
    pub fn record_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    /// Parse and structurally validate a snapshot value.
    ///
    /// Every record of every known collection is checked against the
    /// registry's field rules. The first problem rejects the whole snapshot.
    pub fn from_value(value: Value, registry: &SchemaRegistry) -> Result<Self> {
        let Value::Object(entries) = value else {
            return Err(malformed("$", "snapshot must be a JSON object").into());
        };

        let mut snapshot = Snapshot::new();
        for (name, records) in entries {
            let Some(collection) = Collection::from_name(&name) else {
                debug!(key = %name, "ignoring unknown snapshot key");
                continue;
            };
            let Value::Array(records) = records else {
                return Err(malformed(name, "expected an array of records").into());
            };

            let descriptor = registry.descriptor(collection);
            let mut docs = Vec::with_capacity(records.len());
            for (position, record) in records.into_iter().enumerate() {
                let location = format!("{}[{}]", name, position);
                let doc = into_document(record)
                    .ok_or_else(|| malformed(location.clone(), "record must be a JSON object"))?;
                if let Some(descriptor) = descriptor {
                    descriptor
                        .validate_document(&doc)
                        .map_err(|e| malformed(location, e.to_string()))?;
                }
                docs.push(doc);
            }
            snapshot.insert(collection, docs);
        }
        Ok(snapshot)
    }

    /// Parse and validate a snapshot from JSON text.
    pub fn from_json(json: &str, registry: &SchemaRegistry) -> Result<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| malformed("$", e.to_string()))?;
        Self::from_value(value, registry)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.collections
                .iter()
                .map(|(c, records)| {
                    (
                        c.name().to_string(),
                        Value::Array(records.iter().cloned().map(Value::Object).collect()),
                    )
                })
                .collect(),
        )
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| malformed("$", e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::curation()
    }

    #[test]
    fn parses_known_collections_and_ignores_unknown() {
        let snapshot = Snapshot::from_value(
            json!({
                "curators": [{"id": 100, "name": "Ana"}],
                "restaurants": [{"id": 1, "name": "Noma", "curatorId": 100}],
                "settings": {"theme": "dark"}
            }),
            &registry(),
        )
        .unwrap();
        assert_eq!(snapshot.collections.len(), 2);
        assert_eq!(snapshot.record_count(), 2);
        assert!(snapshot.get(Collection::Concepts).is_none());
    }

    #[test]
    fn rejects_non_object() {
        let err = Snapshot::from_value(json!([1, 2]), &registry()).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn rejects_non_array_collection() {
        let err = Snapshot::from_value(json!({"restaurants": {"id": 1}}), &registry()).unwrap_err();
        assert!(err.to_string().contains("restaurants"));
    }

    #[test]
    fn rejects_record_missing_required_field_with_location() {
        let err = Snapshot::from_value(
            json!({"restaurants": [{"id": 1, "name": "A"}, {"id": 2}]}),
            &registry(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed snapshot at restaurants[1]: missing required field: name"
        );
    }

    #[test]
    fn rejects_invalid_json_text() {
        assert!(Snapshot::from_json("{not json", &registry()).is_err());
    }

    #[test]
    fn serializes_with_collection_names() {
        let snapshot = Snapshot::from_value(
            json!({"restaurantConcepts": [{"restaurantId": 1, "conceptId": 5}]}),
            &registry(),
        )
        .unwrap();
        assert_eq!(
            snapshot.to_value(),
            json!({"restaurantConcepts": [{"restaurantId": 1, "conceptId": 5}]})
        );
        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            snapshot.to_value()
        );
        assert!(snapshot.to_json_pretty().unwrap().contains("restaurantConcepts"));
    }
}

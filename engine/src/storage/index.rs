//! Secondary index over one table.

use crate::error::ValidationError;
use crate::record::{Document, RecordId};
use crate::schema::{IndexDescriptor, KeyPath};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Canonical encoding of an index key: the JSON text of the key value, with
/// integral floats rewritten as integers so `1.0` and `1` collide.
pub(crate) fn canonical_key(value: &Value) -> String {
    match value {
        Value::Number(n) if !n.is_i64() && !n.is_u64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => (f as i64).to_string(),
            _ => n.to_string(),
        },
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_key).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

#[derive(Debug, Clone)]
pub(crate) struct IndexTable {
    descriptor: IndexDescriptor,
    entries: BTreeMap<String, BTreeSet<RecordId>>,
}

impl IndexTable {
    pub(crate) fn new(descriptor: IndexDescriptor) -> Self {
        Self {
            descriptor,
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    pub(crate) fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Key a document is filed under, or `None` if it is not indexed.
    pub(crate) fn key_of(&self, doc: &Document) -> Option<String> {
        self.descriptor
            .key_path
            .extract(doc)
            .map(|v| canonical_key(&v))
    }

    /// Key for an exact-match query value. Compound indexes take an array
    /// with one element per field.
    pub(crate) fn query_key(&self, value: &Value) -> Result<String, ValidationError> {
        if let KeyPath::Compound(fields) = &self.descriptor.key_path {
            let matches_arity = value
                .as_array()
                .is_some_and(|items| items.len() == fields.len());
            if !matches_arity {
                return Err(ValidationError::InvalidIndexKey {
                    index: self.descriptor.name.clone(),
                    reason: format!("expected an array of {} values", fields.len()),
                });
            }
        }
        Ok(canonical_key(value))
    }

    /// Another row already holding `key` in a unique index, if any.
    pub(crate) fn conflict(&self, key: &str, id: &RecordId) -> Option<&RecordId> {
        if !self.descriptor.unique {
            return None;
        }
        self.entries
            .get(key)
            .and_then(|ids| ids.iter().find(|other| *other != id))
    }

    pub(crate) fn insert(&mut self, key: String, id: RecordId) {
        self.entries.entry(key).or_default().insert(id);
    }

    pub(crate) fn remove(&mut self, key: &str, id: &RecordId) {
        if let Some(ids) = self.entries.get_mut(key) {
            ids.remove(id);
            if ids.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    pub(crate) fn lookup(&self, key: &str) -> impl Iterator<Item = &RecordId> {
        self.entries.get(key).into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_key_normalizes_integral_floats() {
        assert_eq!(canonical_key(&json!(1)), canonical_key(&json!(1.0)));
        assert_ne!(canonical_key(&json!(1)), canonical_key(&json!("1")));
        assert_eq!(canonical_key(&json!([1.0, "a"])), "[1,\"a\"]");
    }

    #[test]
    fn unique_conflict_ignores_same_row() {
        let mut index = IndexTable::new(IndexDescriptor::single("restaurantId").unique());
        index.insert("1".into(), RecordId::Int(10));
        assert_eq!(index.conflict("1", &RecordId::Int(10)), None);
        assert_eq!(index.conflict("1", &RecordId::Int(11)), Some(&RecordId::Int(10)));
        assert_eq!(index.conflict("2", &RecordId::Int(11)), None);
    }

    #[test]
    fn non_unique_never_conflicts() {
        let mut index = IndexTable::new(IndexDescriptor::single("curatorId"));
        index.insert("1".into(), RecordId::Int(10));
        assert_eq!(index.conflict("1", &RecordId::Int(11)), None);
    }

    #[test]
    fn compound_query_requires_matching_arity() {
        let index = IndexTable::new(IndexDescriptor::compound("pair", &["a", "b"]));
        assert!(index.query_key(&json!([1, 2])).is_ok());
        assert!(index.query_key(&json!([1])).is_err());
        assert!(index.query_key(&json!(1)).is_err());
    }

    #[test]
    fn remove_drops_empty_keys() {
        let mut index = IndexTable::new(IndexDescriptor::single("x"));
        index.insert("k".into(), RecordId::Int(1));
        index.remove("k", &RecordId::Int(1));
        assert_eq!(index.lookup("k").count(), 0);
        assert!(index.entries.is_empty());
    }
}

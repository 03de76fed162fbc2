//! One collection's rows and indexes.

use super::index::IndexTable;
use crate::clock::IdClock;
use crate::error::ValidationError;
use crate::record::{Document, RecordId};
use crate::schema::IndexDescriptor;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub(crate) struct Table {
    name: String,
    key_path: String,
    rows: BTreeMap<RecordId, Document>,
    indexes: Vec<IndexTable>,
    ids: IdClock,
}

impl Table {
    pub(crate) fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            rows: BTreeMap::new(),
            indexes: Vec::new(),
            ids: IdClock::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn key_path(&self) -> &str {
        &self.key_path
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn get(&self, id: &RecordId) -> Option<&Document> {
        self.rows.get(id)
    }

    pub(crate) fn rows(&self) -> impl Iterator<Item = &Document> {
        self.rows.values()
    }

    pub(crate) fn index_descriptors(&self) -> Vec<IndexDescriptor> {
        self.indexes.iter().map(|i| i.descriptor().clone()).collect()
    }

    pub(crate) fn has_index(&self, name: &str) -> bool {
        self.indexes.iter().any(|i| i.name() == name)
    }

    /// Primary key of a document, if it carries a valid one.
    pub(crate) fn key_of(&self, doc: &Document) -> Option<RecordId> {
        RecordId::of(doc, &self.key_path)
    }

    /// Generate an unused id and write it into `doc`.
    pub(crate) fn assign_id(&mut self, doc: &mut Document, now: i64) -> RecordId {
        let mut id = RecordId::Int(self.ids.next(now));
        while self.rows.contains_key(&id) {
            id = RecordId::Int(self.ids.next(now));
        }
        doc.insert(self.key_path.clone(), id.to_value());
        id
    }

    /// Build a new index over the existing rows.
    pub(crate) fn add_index(&mut self, descriptor: IndexDescriptor) -> Result<(), ValidationError> {
        let mut index = IndexTable::new(descriptor);
        for (id, doc) in &self.rows {
            if let Some(key) = index.key_of(doc) {
                if index.conflict(&key, id).is_some() {
                    return Err(ValidationError::UniqueViolation {
                        collection: self.name.clone(),
                        index: index.name().to_string(),
                        key,
                    });
                }
                index.insert(key, id.clone());
            }
        }
        self.indexes.push(index);
        Ok(())
    }

    /// Rows whose indexed key equals `value`.
    pub(crate) fn lookup(&self, index: &str, value: &Value) -> Result<Vec<&Document>, ValidationError> {
        let index = self
            .indexes
            .iter()
            .find(|i| i.name() == index)
            .ok_or_else(|| ValidationError::UnknownIndex {
                collection: self.name.clone(),
                index: index.to_string(),
            })?;
        let key = index.query_key(value)?;
        Ok(index
            .lookup(&key)
            .filter_map(|id| self.rows.get(id))
            .collect())
    }

    /// Insert or fully replace a row. Returns the id and the row it replaced.
    ///
    /// Unique indexes are checked before anything changes, so a rejected
    /// write leaves the table untouched.
    pub(crate) fn put(&mut self, doc: Document) -> Result<(RecordId, Option<Document>), ValidationError> {
        let id = self
            .key_of(&doc)
            .ok_or_else(|| ValidationError::InvalidRecord {
                collection: self.name.clone(),
                reason: format!("missing or invalid key '{}'", self.key_path),
            })?;

        for index in &self.indexes {
            if let Some(key) = index.key_of(&doc) {
                if index.conflict(&key, &id).is_some() {
                    return Err(ValidationError::UniqueViolation {
                        collection: self.name.clone(),
                        index: index.name().to_string(),
                        key,
                    });
                }
            }
        }

        let previous = self.remove(&id);
        self.insert_unchecked(id.clone(), doc);
        Ok((id, previous))
    }

    /// Remove a row and its index entries.
    pub(crate) fn remove(&mut self, id: &RecordId) -> Option<Document> {
        let doc = self.rows.remove(id)?;
        for index in &mut self.indexes {
            if let Some(key) = index.key_of(&doc) {
                index.remove(&key, id);
            }
        }
        Some(doc)
    }

    /// Put a row back exactly as it was, bypassing constraint checks. Only
    /// used to undo changes, where the prior state is known to be valid.
    pub(crate) fn restore(&mut self, id: &RecordId, previous: Option<Document>) {
        self.remove(id);
        if let Some(doc) = previous {
            self.insert_unchecked(id.clone(), doc);
        }
    }

    fn insert_unchecked(&mut self, id: RecordId, doc: Document) {
        if let RecordId::Int(i) = id {
            self.ids.observe(i);
        }
        for index in &mut self.indexes {
            if let Some(key) = index.key_of(&doc) {
                index.insert(key, id.clone());
            }
        }
        self.rows.insert(id, doc);
    }
}

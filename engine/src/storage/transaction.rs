//! Explicit transaction scope over one collection.

use super::disk;
use super::table::Table;
use crate::clock::now_millis;
use crate::error::{Error, Result};
use crate::record::{Document, RecordId};
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

/// Exclusive access to one collection until committed or dropped.
///
/// Writes apply immediately to the locked table and are recorded in an undo
/// log. [`Transaction::commit`] makes them durable; [`Transaction::abort`],
/// or dropping the transaction without committing, reverts every one of them.
/// No other transaction can observe the collection in between.
pub struct Transaction {
    table: OwnedMutexGuard<Table>,
    undo: Vec<(RecordId, Option<Document>)>,
    dir: Option<PathBuf>,
    finished: bool,
}

impl Transaction {
    pub(crate) fn new(table: OwnedMutexGuard<Table>, dir: Option<PathBuf>) -> Self {
        Self {
            table,
            undo: Vec::new(),
            dir,
            finished: false,
        }
    }

    /// Name of the collection this transaction covers.
    pub fn collection(&self) -> &str {
        self.table.name()
    }

    pub fn get(&self, id: &RecordId) -> Option<Document> {
        self.table.get(id).cloned()
    }

    pub fn get_all(&self) -> Vec<Document> {
        self.table.rows().cloned().collect()
    }

    pub fn get_by_index(&self, index: &str, value: &Value) -> Result<Vec<Document>> {
        Ok(self
            .table
            .lookup(index, value)?
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn count(&self) -> usize {
        self.table.len()
    }

    /// Write a row, replacing any stored row with the same key. A row with no
    /// key (absent or null) is given a fresh one.
    pub fn put(&mut self, mut doc: Document) -> Result<RecordId> {
        let key_path = self.table.key_path().to_string();
        if matches!(doc.get(&key_path), None | Some(Value::Null)) {
            self.table.assign_id(&mut doc, now_millis());
        }
        let (id, previous) = self.table.put(doc)?;
        self.undo.push((id.clone(), previous));
        Ok(id)
    }

    /// Remove a row. Returns whether a row was removed.
    pub fn delete(&mut self, id: &RecordId) -> bool {
        match self.table.remove(id) {
            Some(previous) => {
                self.undo.push((id.clone(), Some(previous)));
                true
            }
            None => false,
        }
    }

    /// Whether any write happened in this transaction.
    pub fn is_dirty(&self) -> bool {
        !self.undo.is_empty()
    }

    /// Make the writes durable and release the collection.
    ///
    /// For a disk-backed engine the collection file is rewritten before the
    /// lock is released; if that fails the writes are reverted and the
    /// transaction aborts.
    pub async fn commit(mut self) -> Result<()> {
        if let (Some(dir), true) = (self.dir.clone(), self.is_dirty()) {
            if let Err(err) = disk::save_table(&dir, &self.table).await {
                warn!(
                    collection = self.table.name(),
                    error = %err,
                    "commit failed; rolling back"
                );
                self.rollback();
                self.finished = true;
                return Err(Error::TransactionAbort {
                    collection: self.table.name().to_string(),
                    reason: err.to_string(),
                });
            }
        }
        debug!(
            collection = self.table.name(),
            writes = self.undo.len(),
            "transaction committed"
        );
        self.finished = true;
        Ok(())
    }

    /// Revert every write and release the collection.
    pub fn abort(mut self) {
        self.rollback();
        self.finished = true;
    }

    fn rollback(&mut self) {
        while let Some((id, previous)) = self.undo.pop() {
            self.table.restore(&id, previous);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished && self.is_dirty() {
            debug!(
                collection = self.table.name(),
                writes = self.undo.len(),
                "transaction dropped without commit; rolling back"
            );
            self.rollback();
        }
    }
}

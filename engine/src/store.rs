//! RecordStore - CRUD and index queries over one collection.
//!
//! The store is permissive: a missing row is `None` or a no-op, never an
//! error. Deciding what absence means is left to the callers above it.

use crate::clock::now_millis;
use crate::error::{Error, Result, ValidationError};
use crate::model::Entity;
use crate::record::{shallow_merge, Document, RecordId, TIMESTAMP_FIELD};
use crate::schema::{Collection, PRIMARY_KEY};
use crate::storage::{Database, Transaction};
use serde_json::Value;
use tracing::debug;

/// Operations on one collection of an open database.
#[derive(Clone)]
pub struct RecordStore {
    db: Database,
    collection: Collection,
}

impl RecordStore {
    pub fn new(db: Database, collection: Collection) -> Self {
        Self { db, collection }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Begin an explicit transaction on this collection.
    ///
    /// Everything done through the transaction is atomic and isolated from
    /// other writers of the collection until it is committed or dropped.
    pub async fn begin(&self) -> Result<Transaction> {
        self.db.transaction(self.collection.name()).await
    }

    /// Get a row by id. `Ok(None)` if absent.
    pub async fn get(&self, id: &RecordId) -> Result<Option<Document>> {
        Ok(self.begin().await?.get(id))
    }

    /// Every row, in key order.
    pub async fn get_all(&self) -> Result<Vec<Document>> {
        Ok(self.begin().await?.get_all())
    }

    /// Exact-match lookup on a declared index. Compound indexes take an
    /// array with one value per field.
    pub async fn get_by_index(&self, index: &str, value: &Value) -> Result<Vec<Document>> {
        self.begin().await?.get_by_index(index, value)
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.begin().await?.count())
    }

    /// Insert or update a row and return its id.
    ///
    /// Without an id a fresh one is assigned. With an id the supplied fields
    /// are merged onto the stored row (read-merge-write in one transaction).
    /// The modification time is stamped in both cases.
    pub async fn put(&self, record: Document) -> Result<RecordId> {
        let mut tx = self.begin().await?;

        let mut row = match RecordId::of(&record, PRIMARY_KEY).and_then(|id| tx.get(&id)) {
            Some(mut stored) => {
                shallow_merge(&mut stored, record);
                stored
            }
            None => record,
        };
        row.insert(TIMESTAMP_FIELD.to_string(), Value::from(now_millis()));

        let id = tx.put(row)?;
        tx.commit().await?;
        debug!(collection = %self.collection, id = %id, "put");
        Ok(id)
    }

    /// Remove a row. Returns whether it existed.
    pub async fn delete(&self, id: &RecordId) -> Result<bool> {
        let mut tx = self.begin().await?;
        let removed = tx.delete(id);
        tx.commit().await?;
        if removed {
            debug!(collection = %self.collection, id = %id, "deleted");
        }
        Ok(removed)
    }

    /// Write every row in one transaction, replacing stored rows wholesale.
    ///
    /// Either all rows become visible or none do; any failure aborts the
    /// transaction with [`Error::TransactionAbort`].
    pub async fn batch_put(&self, records: Vec<Document>) -> Result<Vec<RecordId>> {
        let mut tx = self.begin().await?;
        let mut ids = Vec::with_capacity(records.len());
        for (position, record) in records.into_iter().enumerate() {
            match tx.put(record) {
                Ok(id) => ids.push(id),
                Err(err) => {
                    tx.abort();
                    return Err(Error::TransactionAbort {
                        collection: self.collection.name().to_string(),
                        reason: format!("row {}: {}", position, err),
                    });
                }
            }
        }
        tx.commit().await?;
        debug!(collection = %self.collection, rows = ids.len(), "batch put");
        Ok(ids)
    }

    /// Typed [`RecordStore::get`].
    pub async fn get_entity<E: Entity>(&self, id: &RecordId) -> Result<Option<E>> {
        self.check_entity::<E>()?;
        self.get(id).await?.map(E::from_document).transpose()
    }

    /// Typed [`RecordStore::put`]. Unset optional fields keep their stored
    /// values.
    pub async fn put_entity<E: Entity>(&self, entity: &E) -> Result<RecordId> {
        self.check_entity::<E>()?;
        self.put(entity.to_document()?).await
    }

    fn check_entity<E: Entity>(&self) -> Result<()> {
        if E::COLLECTION != self.collection {
            return Err(ValidationError::InvalidRecord {
                collection: self.collection.name().to_string(),
                reason: format!("expected a {} record", self.collection.singular()),
            }
            .into());
        }
        Ok(())
    }
}

//! Snapshot export and merge-driven import.
//!
//! # Import
//!
//! 1. The payload is parsed into a [`Snapshot`], which validates every
//!    record's shape. A malformed snapshot is rejected before any write.
//! 2. Every foreign key of every incoming row must resolve to a stored row
//!    or to an accepted row of the snapshot. Rows that do not resolve are
//!    left out and reported, along with rows that reference them.
//! 3. Collections are processed in dependency order ([`Collection::ALL`]).
//!    A collection that cannot be imported at all is reported and skipped.
//! 4. Each collection's stored rows are merged with the incoming rows using
//!    the collection's [`MergeStrategy`](crate::MergeStrategy).
//! 5. Rows that are new or changed are written with
//!    [`RecordStore::batch_put`] in chunks of [`ImportOptions::chunk_size`].
//!    Chunks commit independently: a failed chunk is reported and the import
//!    moves on, and chunks already committed stay committed.
//! 6. The finished database is audited for dangling references.
//!
//! Importing the same snapshot twice leaves the database as it was after the
//! first import.

use crate::blob::{BlobStore, ImageStore};
use crate::error::{Error, PartialFailure, Result, ValidationError};
use crate::integrity::{DanglingReference, ReferentialIntegrityManager, FOREIGN_KEYS};
use crate::reconcile::{merge_documents, primary_key, MergeStrategy};
use crate::record::{Document, RecordId};
use crate::schema::{Collection, SchemaRegistry, PRIMARY_KEY};
use crate::snapshot::Snapshot;
use crate::store::RecordStore;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Rows written per `batch_put` during an import.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    pub chunk_size: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Counts for one imported collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionImport {
    /// Rows in the snapshot
    pub incoming: usize,
    /// Rows with a key not stored before
    pub added: usize,
    /// Rows that overwrote a stored row with the same key
    pub replaced: usize,
    /// Rows left out by the merge
    pub skipped: usize,
    /// Rows actually written
    pub written: usize,
    /// Rows in chunks that failed to commit
    pub failed: usize,
    /// Rows left out because a reference did not resolve
    pub rejected: usize,
    /// Why the collection could not be imported at all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A chunk whose transaction aborted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkFailure {
    pub collection: Collection,
    /// Position of the chunk within the collection's writes
    pub chunk: usize,
    /// Ids of the rows in the chunk; rows awaiting a fresh id are not listed
    pub ids: Vec<RecordId>,
    pub rows: usize,
    pub error: String,
}

/// An incoming row left out because one of its references does not resolve.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedRow {
    pub collection: Collection,
    /// Position of the row in the snapshot's list for its collection
    pub position: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub error: String,
}

/// Outcome of an import.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub collections: BTreeMap<Collection, CollectionImport>,
    pub failures: Vec<ChunkFailure>,
    pub rejected: Vec<RejectedRow>,
    /// Stored references that do not resolve after the import
    pub dangling: Vec<DanglingReference>,
}

impl ImportReport {
    pub fn written(&self) -> usize {
        self.collections.values().map(|c| c.written).sum()
    }

    /// Whether every incoming row was either written or deliberately left
    /// unchanged by the merge.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
            && self.rejected.is_empty()
            && self.collections.values().all(|c| c.error.is_none())
    }
}

/// Exports and imports whole-database snapshots.
#[derive(Clone)]
pub struct ImportExportService<B: BlobStore = ImageStore> {
    registry: SchemaRegistry,
    integrity: ReferentialIntegrityManager<B>,
    options: ImportOptions,
}

impl<B: BlobStore> ImportExportService<B> {
    pub fn new(registry: SchemaRegistry, integrity: ReferentialIntegrityManager<B>) -> Self {
        Self {
            registry,
            integrity,
            options: ImportOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> ImportOptions {
        self.options
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    fn store(&self, collection: Collection) -> RecordStore {
        self.integrity.store(collection)
    }

    /// Read the given collections (all of them by default) into a snapshot.
    ///
    /// Each collection is read in its own transaction, so a snapshot taken
    /// during concurrent writes may mix states across collections.
    pub async fn export_all(&self, collections: Option<&[Collection]>) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        for &collection in collections.unwrap_or(&Collection::ALL) {
            let records = self.store(collection).get_all().await?;
            snapshot.insert(collection, records);
        }
        info!(
            collections = snapshot.collections.len(),
            records = snapshot.record_count(),
            "exported snapshot"
        );
        Ok(snapshot)
    }

    /// Validate and import a snapshot given as a JSON value.
    pub async fn import_value(&self, value: Value) -> Result<ImportReport> {
        let snapshot = Snapshot::from_value(value, &self.registry)?;
        self.import_all(snapshot).await
    }

    /// Validate and import a snapshot given as JSON text.
    pub async fn import_json(&self, json: &str) -> Result<ImportReport> {
        let snapshot = Snapshot::from_json(json, &self.registry)?;
        self.import_all(snapshot).await
    }

    /// Merge a snapshot into the database.
    ///
    /// If any row was not imported the result is [`Error::PartialFailure`]
    /// carrying the full report.
    pub async fn import_all(&self, mut snapshot: Snapshot) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        self.reject_dangling(&mut snapshot, &mut report.rejected)
            .await?;

        for collection in Collection::ALL {
            let Some(incoming) = snapshot.collections.remove(&collection) else {
                continue;
            };
            let incoming_len = incoming.len();
            let mut counts = match self
                .import_collection(collection, incoming, &mut report.failures)
                .await
            {
                Ok(counts) => counts,
                Err(err) => {
                    warn!(collection = %collection, error = %err, "collection import failed");
                    CollectionImport {
                        incoming: incoming_len,
                        failed: incoming_len,
                        error: Some(err.to_string()),
                        ..Default::default()
                    }
                }
            };
            counts.rejected = report
                .rejected
                .iter()
                .filter(|r| r.collection == collection)
                .count();
            counts.incoming += counts.rejected;
            report.collections.insert(collection, counts);
        }

        report.dangling = match self.integrity.audit().await {
            Ok(dangling) => dangling,
            Err(err) => {
                warn!(error = %err, "post-import audit failed");
                Vec::new()
            }
        };

        if report.is_complete() {
            info!(
                collections = report.collections.len(),
                written = report.written(),
                dangling = report.dangling.len(),
                "import complete"
            );
            Ok(report)
        } else {
            warn!(
                failed_chunks = report.failures.len(),
                rejected = report.rejected.len(),
                written = report.written(),
                "import finished with failures"
            );
            Err(Error::partial(PartialFailure::Import(report)))
        }
    }

    /// Leave out incoming rows whose references resolve neither to a stored
    /// row nor to an accepted row of the snapshot.
    async fn reject_dangling(
        &self,
        snapshot: &mut Snapshot,
        rejected: &mut Vec<RejectedRow>,
    ) -> Result<()> {
        let mut accepted: HashMap<Collection, HashSet<RecordId>> = HashMap::new();
        let mut stored: HashMap<(Collection, RecordId), bool> = HashMap::new();

        for collection in Collection::ALL {
            let Some(rows) = snapshot.collections.remove(&collection) else {
                continue;
            };
            let references: Vec<(&str, Collection)> = FOREIGN_KEYS
                .iter()
                .filter(|(c, _, _)| *c == collection)
                .map(|&(_, field, target)| (field, target))
                .collect();

            let mut kept = Vec::with_capacity(rows.len());
            'rows: for (position, row) in rows.into_iter().enumerate() {
                for &(field, target) in &references {
                    let Some(target_id) = RecordId::of(&row, field) else {
                        continue;
                    };
                    if accepted.get(&target).is_some_and(|ids| ids.contains(&target_id)) {
                        continue;
                    }
                    let key = (target, target_id);
                    let exists = match stored.get(&key) {
                        Some(&exists) => exists,
                        None => {
                            let exists = self.integrity.exists(target, &key.1).await?;
                            stored.insert(key.clone(), exists);
                            exists
                        }
                    };
                    if !exists {
                        let error = ValidationError::DanglingReference {
                            collection,
                            field: field.to_string(),
                            target,
                            id: key.1,
                        };
                        debug!(collection = %collection, position, error = %error, "row rejected");
                        rejected.push(RejectedRow {
                            collection,
                            position,
                            id: primary_key(&row),
                            error: error.to_string(),
                        });
                        continue 'rows;
                    }
                }
                if let Some(id) = primary_key(&row) {
                    accepted.entry(collection).or_default().insert(id);
                }
                kept.push(row);
            }
            snapshot.insert(collection, kept);
        }

        if !rejected.is_empty() {
            warn!(rows = rejected.len(), "import rows with unresolved references left out");
        }
        Ok(())
    }

    async fn import_collection(
        &self,
        collection: Collection,
        incoming: Vec<Document>,
        failures: &mut Vec<ChunkFailure>,
    ) -> Result<CollectionImport> {
        let store = self.store(collection);
        let existing = store.get_all().await?;
        let stored: HashMap<RecordId, Document> = existing
            .iter()
            .filter_map(|doc| primary_key(doc).map(|id| (id, doc.clone())))
            .collect();
        let existing_len = existing.len();

        let incoming_len = incoming.len();
        let strategy = collection.merge_strategy();
        let outcome = merge_documents(strategy, existing, incoming);
        let mut counts = CollectionImport {
            incoming: incoming_len,
            added: outcome.added,
            replaced: outcome.replaced,
            skipped: outcome.skipped,
            ..Default::default()
        };

        let pending: Vec<Document> = match strategy {
            MergeStrategy::ByKey => outcome
                .records
                .into_iter()
                .filter(|row| primary_key(row).is_some_and(|id| stored.get(&id) != Some(row)))
                .collect(),
            MergeStrategy::Relationship => {
                let mut taken: HashSet<RecordId> = stored.into_keys().collect();
                outcome
                    .records
                    .into_iter()
                    .skip(existing_len)
                    .map(|mut row| {
                        let fresh = primary_key(&row).is_some_and(|id| taken.insert(id));
                        if !fresh {
                            row.remove(PRIMARY_KEY);
                        }
                        row
                    })
                    .collect()
            }
        };

        let chunk_size = self.options.chunk_size.max(1);
        let mut rows = pending.into_iter().peekable();
        let mut chunk = 0;
        while rows.peek().is_some() {
            let batch: Vec<Document> = rows.by_ref().take(chunk_size).collect();
            let ids: Vec<RecordId> = batch.iter().filter_map(primary_key).collect();
            let len = batch.len();
            match store.batch_put(batch).await {
                Ok(written) => counts.written += written.len(),
                Err(err) => {
                    warn!(
                        collection = %collection,
                        chunk,
                        rows = len,
                        error = %err,
                        "import chunk failed"
                    );
                    counts.failed += len;
                    failures.push(ChunkFailure {
                        collection,
                        chunk,
                        ids,
                        rows: len,
                        error: err.to_string(),
                    });
                }
            }
            chunk += 1;
        }

        debug!(
            collection = %collection,
            incoming = counts.incoming,
            written = counts.written,
            failed = counts.failed,
            "collection imported"
        );
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CURRENT_SCHEMA_VERSION;
    use crate::storage::StorageEngine;
    use serde_json::json;

    async fn service() -> ImportExportService {
        let registry = SchemaRegistry::curation();
        let db = registry
            .open(&StorageEngine::in_memory(), "test", CURRENT_SCHEMA_VERSION)
            .await
            .unwrap();
        ImportExportService::new(registry, ReferentialIntegrityManager::new(db))
    }

    #[tokio::test]
    async fn malformed_snapshot_writes_nothing() {
        let service = service().await;
        let err = service
            .import_value(json!({
                "curators": [{"id": 100, "name": "Ana"}],
                "restaurants": [{"id": 1}]
            }))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(service.store(Collection::Curators).count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unchanged_rows_are_not_rewritten() {
        let service = service().await;
        let snapshot = json!({"curators": [{"id": 100, "name": "Ana", "timestamp": 1}]});

        let first = service.import_value(snapshot.clone()).await.unwrap();
        assert_eq!(first.collections[&Collection::Curators].written, 1);

        let second = service.import_value(snapshot).await.unwrap();
        let counts = &second.collections[&Collection::Curators];
        assert_eq!(counts.replaced, 1);
        assert_eq!(counts.written, 0);
    }

    #[tokio::test]
    async fn relationship_rows_with_taken_ids_get_fresh_ids() {
        let service = service().await;
        service
            .import_value(json!({
                "restaurants": [{"id": 1, "name": "Noma"}],
                "concepts": [
                    {"id": 10, "category": "cuisine", "value": "thai"},
                    {"id": 11, "category": "cuisine", "value": "lao"},
                    {"id": 12, "category": "mood", "value": "casual"}
                ],
                "restaurantConcepts": [{"id": 1, "restaurantId": 1, "conceptId": 10}]
            }))
            .await
            .unwrap();
        let report = service
            .import_value(json!({
                "restaurantConcepts": [
                    {"id": 1, "restaurantId": 1, "conceptId": 11},
                    {"restaurantId": 1, "conceptId": 12}
                ]
            }))
            .await
            .unwrap();
        assert_eq!(report.collections[&Collection::RestaurantConcepts].written, 2);

        let rows = service
            .store(Collection::RestaurantConcepts)
            .get_all()
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        let ids: HashSet<_> = rows.iter().filter_map(primary_key).collect();
        assert_eq!(ids.len(), 3);
        assert!(report.dangling.is_empty());
    }

    #[tokio::test]
    async fn rows_with_unresolved_references_are_left_out() {
        let service = service().await;
        let err = service
            .import_value(json!({
                "curators": [{"id": 100, "name": "Ana"}],
                "restaurants": [
                    {"id": 1, "name": "Noma", "curatorId": 999},
                    {"id": 2, "name": "Geranium", "curatorId": 100}
                ],
                "restaurantConcepts": [
                    {"restaurantId": 1, "conceptId": 77},
                    {"restaurantId": 42, "conceptId": 77}
                ]
            }))
            .await
            .unwrap_err();
        let Error::PartialFailure(failure) = err else {
            panic!("expected a partial failure, got {:?}", err);
        };
        let PartialFailure::Import(report) = *failure else {
            panic!("expected an import report");
        };

        assert_eq!(report.rejected.len(), 3);
        assert_eq!(report.rejected[0].collection, Collection::Restaurants);
        assert_eq!(report.rejected[0].position, 0);
        assert_eq!(report.rejected[0].id, Some(RecordId::Int(1)));
        assert!(report.rejected[0].error.contains("curatorId"));
        let restaurants = &report.collections[&Collection::Restaurants];
        assert_eq!((restaurants.incoming, restaurants.written, restaurants.rejected), (2, 1, 1));
        assert_eq!(report.collections[&Collection::RestaurantConcepts].rejected, 2);

        assert_eq!(service.store(Collection::Restaurants).count().await.unwrap(), 1);
        assert!(service
            .store(Collection::Restaurants)
            .get(&RecordId::Int(1))
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            service.store(Collection::RestaurantConcepts).count().await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn references_may_resolve_to_stored_rows() {
        let service = service().await;
        service
            .import_value(json!({"curators": [{"id": 100, "name": "Ana"}]}))
            .await
            .unwrap();
        let report = service
            .import_value(json!({
                "restaurants": [{"id": 1, "name": "Noma", "curatorId": 100}]
            }))
            .await
            .unwrap();
        assert_eq!(report.collections[&Collection::Restaurants].written, 1);
        assert!(report.rejected.is_empty());
    }

    #[tokio::test]
    async fn missing_collection_is_reported_and_others_still_import() {
        let engine = StorageEngine::in_memory();
        let registry = SchemaRegistry::curation();
        let db = registry
            .clone()
            .without_collection(Collection::RestaurantLocations)
            .open(&engine, "partial", CURRENT_SCHEMA_VERSION)
            .await
            .unwrap();
        let service = ImportExportService::new(registry, ReferentialIntegrityManager::new(db));

        let err = service
            .import_value(json!({
                "curators": [{"id": 100, "name": "Ana"}],
                "restaurants": [{"id": 1, "name": "Noma", "curatorId": 100}],
                "restaurantLocations": [{"id": 50, "restaurantId": 1}],
                "concepts": [{"id": 10, "category": "cuisine", "value": "thai"}],
                "restaurantConcepts": [{"restaurantId": 1, "conceptId": 10}]
            }))
            .await
            .unwrap_err();
        let Error::PartialFailure(failure) = err else {
            panic!("expected a partial failure, got {:?}", err);
        };
        let PartialFailure::Import(report) = *failure else {
            panic!("expected an import report");
        };

        let locations = &report.collections[&Collection::RestaurantLocations];
        assert_eq!((locations.incoming, locations.failed), (1, 1));
        assert!(locations.error.as_deref().unwrap().contains("restaurantLocations"));
        assert_eq!(report.collections[&Collection::RestaurantConcepts].written, 1);
        assert_eq!(report.collections[&Collection::Restaurants].written, 1);
        assert_eq!(
            service.store(Collection::RestaurantConcepts).count().await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn export_selected_collections() {
        let service = service().await;
        service
            .import_value(json!({
                "curators": [{"id": 100, "name": "Ana"}],
                "concepts": [{"id": 10, "category": "cuisine", "value": "thai"}]
            }))
            .await
            .unwrap();

        let snapshot = service
            .export_all(Some(&[Collection::Concepts]))
            .await
            .unwrap();
        assert_eq!(snapshot.collections.len(), 1);
        assert_eq!(snapshot.get(Collection::Concepts).unwrap().len(), 1);

        let everything = service.export_all(None).await.unwrap();
        assert_eq!(everything.collections.len(), Collection::ALL.len());
        assert_eq!(everything.record_count(), 2);
    }
}

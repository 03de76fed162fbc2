//! End-to-end behavior of the curation engine.

use curation_engine::{
    record::into_document, Collection, Document, Error, ImportExportService, ImportOptions,
    InitializationFailure, PartialFailure, RecordId, RecordStore, ReferentialIntegrityManager,
    SchemaRegistry, StorageConfig, StorageEngine, ValidationError, CURRENT_SCHEMA_VERSION,
};
use serde_json::{json, Value};

fn doc(value: Value) -> Document {
    into_document(value).unwrap()
}

async fn open(engine: &StorageEngine) -> (ReferentialIntegrityManager, ImportExportService) {
    let registry = SchemaRegistry::curation();
    let db = registry
        .open(engine, "curation", CURRENT_SCHEMA_VERSION)
        .await
        .unwrap();
    let integrity = ReferentialIntegrityManager::new(db);
    let transfer = ImportExportService::new(registry, integrity.clone());
    (integrity, transfer)
}

fn sample_snapshot() -> Value {
    json!({
        "curators": [{"id": 100, "name": "Ana", "timestamp": 1706745600000i64}],
        "concepts": [
            {"id": 10, "category": "cuisine", "value": "thai"},
            {"id": 11, "category": "mood", "value": "casual"}
        ],
        "restaurants": [{"id": 1, "name": "Noma", "curatorId": 100, "status": "draft"}],
        "restaurantConcepts": [
            {"restaurantId": 1, "conceptId": 10},
            {"restaurantId": 1, "conceptId": 11}
        ]
    })
}

// ============================================================================
// Import
// ============================================================================

#[tokio::test]
async fn import_twice_is_idempotent() {
    let engine = StorageEngine::in_memory();
    let (_, transfer) = open(&engine).await;

    transfer.import_value(sample_snapshot()).await.unwrap();
    let first = transfer.export_all(None).await.unwrap();

    let report = transfer.import_value(sample_snapshot()).await.unwrap();
    let second = transfer.export_all(None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(report.written(), 0);
    assert_eq!(
        second.get(Collection::RestaurantConcepts).unwrap().len(),
        2
    );
}

#[tokio::test]
async fn exported_snapshot_imports_into_empty_database() {
    let source = StorageEngine::in_memory();
    let (_, transfer) = open(&source).await;
    transfer.import_value(sample_snapshot()).await.unwrap();
    let exported = transfer.export_all(None).await.unwrap();

    let target = StorageEngine::in_memory();
    let (_, copy) = open(&target).await;
    let report = copy.import_json(&exported.to_json()).await.unwrap();
    assert!(report.dangling.is_empty());
    assert_eq!(copy.export_all(None).await.unwrap(), exported);
}

#[tokio::test]
async fn omitted_collections_are_untouched() {
    let engine = StorageEngine::in_memory();
    let (integrity, transfer) = open(&engine).await;
    transfer.import_value(sample_snapshot()).await.unwrap();

    transfer
        .import_value(json!({"curators": [{"id": 101, "name": "Ben"}], "ui": {"tab": 2}}))
        .await
        .unwrap();

    assert_eq!(integrity.store(Collection::Curators).count().await.unwrap(), 2);
    assert_eq!(
        integrity.store(Collection::Restaurants).count().await.unwrap(),
        1
    );
}

#[tokio::test]
async fn failed_chunk_is_reported_and_earlier_chunks_stay() {
    let engine = StorageEngine::in_memory();
    let (integrity, transfer) = open(&engine).await;
    let transfer = transfer.with_options(ImportOptions { chunk_size: 1 });

    integrity
        .save_restaurant(doc(json!({"id": 1, "name": "Noma"})), None)
        .await
        .unwrap();

    // Two locations for one restaurant: the second violates the unique index.
    let err = transfer
        .import_value(json!({
            "restaurantLocations": [
                {"id": 50, "restaurantId": 1, "address": "Refshalevej 96"},
                {"id": 51, "restaurantId": 1, "address": "Strandgade 93"}
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
    let counts = &report.collections[&Collection::RestaurantLocations];
    assert_eq!((counts.written, counts.failed), (1, 1));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].chunk, 1);
    assert_eq!(report.failures[0].ids, vec![RecordId::Int(51)]);

    let locations = integrity.store(Collection::RestaurantLocations);
    assert!(locations.get(&RecordId::Int(50)).await.unwrap().is_some());
    assert!(locations.get(&RecordId::Int(51)).await.unwrap().is_none());
}

#[tokio::test]
async fn import_never_writes_unresolved_references() {
    let engine = StorageEngine::in_memory();
    let (integrity, transfer) = open(&engine).await;
    let err = transfer
        .import_value(json!({
            "restaurants": [{"id": 1, "name": "Noma", "curatorId": 999}],
            "restaurantConcepts": [{"restaurantId": 42, "conceptId": 77}]
        }))
        .await
        .unwrap_err();

    let Error::PartialFailure(failure) = err else {
        panic!("expected a partial failure, got {:?}", err);
    };
    let PartialFailure::Import(report) = *failure else {
        panic!("expected an import report");
    };
    assert_eq!(report.rejected.len(), 2);
    assert_eq!(report.written(), 0);
    assert!(report.rejected[0].error.contains("999"));

    assert_eq!(integrity.store(Collection::Restaurants).count().await.unwrap(), 0);
    assert_eq!(
        integrity
            .store(Collection::RestaurantConcepts)
            .count()
            .await
            .unwrap(),
        0
    );
    assert!(integrity.audit().await.unwrap().is_empty());
}

// ============================================================================
// Integrity
// ============================================================================

#[tokio::test]
async fn restaurant_with_unknown_curator_is_rejected() {
    let engine = StorageEngine::in_memory();
    let (integrity, _) = open(&engine).await;

    let err = integrity
        .save_restaurant(doc(json!({"name": "Noma", "curatorId": 999})), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::DanglingReference { .. })
    ));
    assert!(integrity
        .store(Collection::Restaurants)
        .get_all()
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn curator_protection() {
    let engine = StorageEngine::in_memory();
    let (integrity, transfer) = open(&engine).await;
    transfer.import_value(sample_snapshot()).await.unwrap();
    let before = transfer.export_all(None).await.unwrap();

    let err = integrity
        .delete_curator(&RecordId::Int(100))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(transfer.export_all(None).await.unwrap(), before);
}

#[tokio::test]
async fn import_then_cascade_delete() {
    let engine = StorageEngine::in_memory();
    let (integrity, transfer) = open(&engine).await;
    transfer.import_value(sample_snapshot()).await.unwrap();

    let report = integrity
        .cascade_delete_restaurant(&RecordId::Int(1))
        .await
        .unwrap();
    assert_eq!(report.cleaned(Collection::RestaurantConcepts), 2);

    let snapshot = transfer.export_all(None).await.unwrap();
    assert!(snapshot.get(Collection::Restaurants).unwrap().is_empty());
    assert!(snapshot
        .get(Collection::RestaurantConcepts)
        .unwrap()
        .is_empty());
    assert_eq!(snapshot.get(Collection::Curators).unwrap().len(), 1);
    assert_eq!(snapshot.get(Collection::Concepts).unwrap().len(), 2);
}

// ============================================================================
// Schema upgrade
// ============================================================================

fn version_one_registry() -> SchemaRegistry {
    // Before locations existed and before restaurants were indexed by status.
    let mut restaurants = Collection::Restaurants.descriptor();
    restaurants.indexes.retain(|i| i.name != "status");
    SchemaRegistry::curation()
        .with_collection(restaurants)
        .without_collection(Collection::RestaurantLocations)
}

#[tokio::test]
async fn upgrade_adds_missing_collections_and_indexes() {
    let engine = StorageEngine::in_memory();
    {
        let db = version_one_registry()
            .open(&engine, "curation", 1)
            .await
            .unwrap();
        assert!(!db.has_collection("restaurantLocations").await);
        RecordStore::new(db, Collection::Restaurants)
            .put(doc(json!({"id": 1, "name": "Noma", "status": "production"})))
            .await
            .unwrap();
    }

    let db = SchemaRegistry::curation()
        .open(&engine, "curation", 2)
        .await
        .unwrap();
    assert_eq!(db.version(), 2);
    assert!(db.has_collection("restaurantLocations").await);

    let restaurants = RecordStore::new(db.clone(), Collection::Restaurants);
    let found = restaurants
        .get_by_index("status", &json!("production"))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["name"], "Noma");
}

#[tokio::test]
async fn same_version_never_changes_the_schema() {
    let engine = StorageEngine::in_memory();
    drop(
        version_one_registry()
            .open(&engine, "curation", 1)
            .await
            .unwrap(),
    );
    let db = SchemaRegistry::curation()
        .open(&engine, "curation", 1)
        .await
        .unwrap();
    assert!(!db.has_collection("restaurantLocations").await);
}

#[tokio::test]
async fn open_connection_blocks_upgrade() {
    let engine = StorageEngine::in_memory();
    let db = SchemaRegistry::curation()
        .open(&engine, "curation", 1)
        .await
        .unwrap();

    let err = SchemaRegistry::curation()
        .open(&engine, "curation", 2)
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        Error::Initialization {
            reason: InitializationFailure::Blocked { .. },
            ..
        }
    ));
    assert_eq!(db.version(), 1);

    drop(db);
    assert!(SchemaRegistry::curation()
        .open(&engine, "curation", 2)
        .await
        .is_ok());
}

#[tokio::test]
async fn downgrade_is_rejected() {
    let engine = StorageEngine::in_memory();
    drop(
        SchemaRegistry::curation()
            .open(&engine, "curation", 3)
            .await
            .unwrap(),
    );
    let err = SchemaRegistry::curation()
        .open(&engine, "curation", 2)
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        Error::Initialization {
            reason: InitializationFailure::VersionDowngrade { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn unique_index_over_violating_rows_fails_whole_upgrade() {
    let engine = StorageEngine::in_memory();
    let mut locations = Collection::RestaurantLocations.descriptor();
    locations.indexes.clear();
    {
        let db = SchemaRegistry::curation()
            .with_collection(locations)
            .open(&engine, "curation", 1)
            .await
            .unwrap();
        RecordStore::new(db, Collection::RestaurantLocations)
            .batch_put(vec![
                doc(json!({"id": 1, "restaurantId": 7})),
                doc(json!({"id": 2, "restaurantId": 7})),
            ])
            .await
            .unwrap();
    }

    let err = SchemaRegistry::curation()
        .open(&engine, "curation", 2)
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        Error::Initialization {
            reason: InitializationFailure::UpgradeFailed(_),
            ..
        }
    ));

    let db = SchemaRegistry::curation()
        .open(&engine, "curation", 1)
        .await
        .unwrap();
    assert_eq!(db.version(), 1);
    assert!(db
        .index_names("restaurantLocations")
        .await
        .unwrap()
        .is_empty());
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn data_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig::on_disk(dir.path());

    {
        let engine = StorageEngine::new(config.clone());
        let (_, transfer) = open(&engine).await;
        transfer.import_value(sample_snapshot()).await.unwrap();
    }

    let engine = StorageEngine::new(config);
    let (integrity, transfer) = open(&engine).await;
    let snapshot = transfer.export_all(None).await.unwrap();
    assert_eq!(snapshot.get(Collection::Restaurants).unwrap().len(), 1);
    assert_eq!(
        snapshot.get(Collection::RestaurantConcepts).unwrap().len(),
        2
    );

    // Indexes are rebuilt on load.
    let links = integrity
        .store(Collection::RestaurantConcepts)
        .get_by_index("restaurantConcept", &json!([1, 10]))
        .await
        .unwrap();
    assert_eq!(links.len(), 1);

    // New ids stay clear of loaded ones.
    let id = integrity
        .store(Collection::Curators)
        .put(doc(json!({"name": "Ben"})))
        .await
        .unwrap();
    assert_ne!(id, RecordId::Int(100));
}

//! # Curation Engine
//!
//! Persistence layer for a restaurant curation tool.
//!
//! The crate keeps restaurants, curators, concepts, and their relationships
//! in a versioned document store, enforces the foreign-key rules between
//! them, and moves whole-database snapshots in and out.
//!
//! ## Components
//!
//! - [`StorageEngine`]: named, versioned databases of keyed collections with
//!   secondary indexes and per-collection transactions. In memory, optionally
//!   mirrored to a data directory.
//! - [`SchemaRegistry`]: declares the collections and indexes and performs
//!   the additive schema upgrade when a database is opened.
//! - [`RecordStore`]: CRUD and index queries over one collection.
//! - [`ReferentialIntegrityManager`]: reference validation on writes,
//!   cascade delete for restaurants, protected delete for curators and
//!   concepts.
//! - [`reconcile`]: pure merge functions used by imports.
//! - [`ImportExportService`]: snapshot export and merge-driven import.
//!
//! ## Quick Start
//!
//! ```rust
//! use curation_engine::{
//!     Collection, ReferentialIntegrityManager, SchemaRegistry, StorageEngine,
//!     CURRENT_SCHEMA_VERSION,
//! };
//! use serde_json::json;
//!
//! # tokio_test_block(async {
//! let engine = StorageEngine::in_memory();
//! let db = SchemaRegistry::curation()
//!     .open(&engine, "curation", CURRENT_SCHEMA_VERSION)
//!     .await?;
//!
//! let integrity = ReferentialIntegrityManager::new(db);
//! let curator = integrity
//!     .store(Collection::Curators)
//!     .put(json!({"name": "Ana"}).as_object().cloned().unwrap_or_default())
//!     .await?;
//!
//! let restaurant = json!({"name": "Noma", "curatorId": curator});
//! let id = integrity
//!     .save_restaurant(restaurant.as_object().cloned().unwrap_or_default(), None)
//!     .await?;
//!
//! let report = integrity.cascade_delete_restaurant(&id).await?;
//! assert_eq!(report.cleaned(Collection::Restaurants), 1);
//! # Ok::<(), curation_engine::Error>(())
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod blob;
pub mod clock;
pub mod error;
pub mod import_export;
pub mod integrity;
pub mod model;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod storage;
pub mod store;

// Re-export main types at crate root
pub use blob::{BlobStore, ImageStore};
pub use error::{Error, FieldError, InitializationFailure, PartialFailure, Result, ValidationError};
pub use import_export::{
    ChunkFailure, CollectionImport, ImportExportService, ImportOptions, ImportReport,
    RejectedRow, DEFAULT_CHUNK_SIZE,
};
pub use integrity::{CascadeReport, DanglingReference, ReferentialIntegrityManager, RowFailure};
pub use model::{
    Concept, Curator, Entity, ImageBlob, Location, Photo, Restaurant, RestaurantConcept,
    RestaurantStatus, TimeValue,
};
pub use reconcile::{merge_by_key, merge_relationships, relationship_key, MergeOutcome, MergeStrategy};
pub use record::{Document, RecordId};
pub use schema::{
    Collection, CollectionDescriptor, FieldDef, FieldType, IndexDescriptor, KeyPath,
    SchemaRegistry, UpgradePlan, CURRENT_SCHEMA_VERSION, DEFAULT_DATABASE_NAME,
};
pub use snapshot::Snapshot;
pub use storage::{Database, StorageConfig, StorageEngine, Transaction, Upgrade};
pub use store::RecordStore;

/// Epoch milliseconds.
pub type Timestamp = i64;
pub type SchemaVersion = u32;

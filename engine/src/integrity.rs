//! Foreign-key rules across the curation collections.
//!
//! Single-entity writes validate first and reject outright. Deletes that
//! span collections continue past failures and report what was and was not
//! removed.
//!
//! Nothing here is isolated across collections: a writer touching locations
//! can interleave with a cascade that is also touching locations.

use crate::blob::{BlobStore, ImageStore};
use crate::clock::now_millis;
use crate::error::{Error, PartialFailure, Result, ValidationError};
use crate::model::{Entity, ImageBlob, Photo};
use crate::record::{shallow_merge, Document, RecordId, TIMESTAMP_FIELD};
use crate::schema::{Collection, PRIMARY_KEY};
use crate::storage::Database;
use crate::store::RecordStore;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Every foreign-key field: (collection, field, referenced collection).
pub const FOREIGN_KEYS: &[(Collection, &str, Collection)] = &[
    (Collection::Restaurants, "curatorId", Collection::Curators),
    (Collection::RestaurantConcepts, "restaurantId", Collection::Restaurants),
    (Collection::RestaurantConcepts, "conceptId", Collection::Concepts),
    (Collection::RestaurantLocations, "restaurantId", Collection::Restaurants),
    (Collection::RestaurantPhotos, "restaurantId", Collection::Restaurants),
    (Collection::RestaurantPhotos, "imageId", Collection::Images),
];

/// A row that could not be removed during a cascade.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    pub collection: Collection,
    pub id: RecordId,
    pub operation: String,
    pub error: String,
}

/// What a cascade delete did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub restaurant_id: RecordId,
    /// Rows removed per collection
    pub cleaned: BTreeMap<Collection, usize>,
    pub failures: Vec<RowFailure>,
}

impl CascadeReport {
    fn new(restaurant_id: RecordId) -> Self {
        Self {
            restaurant_id,
            cleaned: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    /// Rows removed from one collection.
    pub fn cleaned(&self, collection: Collection) -> usize {
        self.cleaned.get(&collection).copied().unwrap_or(0)
    }

    fn record(&mut self, collection: Collection) {
        *self.cleaned.entry(collection).or_default() += 1;
    }

    fn fail(&mut self, collection: Collection, id: &RecordId, operation: &str, err: &Error) {
        warn!(
            collection = %collection,
            id = %id,
            operation,
            error = %err,
            "cascade step failed"
        );
        self.failures.push(RowFailure {
            collection,
            id: id.clone(),
            operation: operation.to_string(),
            error: err.to_string(),
        });
    }
}

/// A stored foreign key that does not resolve.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DanglingReference {
    pub collection: Collection,
    pub id: RecordId,
    pub field: String,
    pub target: Collection,
    pub target_id: RecordId,
}

/// Enforces the foreign-key, cascade, and protect rules.
#[derive(Clone)]
pub struct ReferentialIntegrityManager<B: BlobStore = ImageStore> {
    db: Database,
    blobs: B,
}

impl ReferentialIntegrityManager<ImageStore> {
    /// Manager keeping image payloads in the `images` collection.
    pub fn new(db: Database) -> Self {
        let blobs = ImageStore::new(db.clone());
        Self::with_blob_store(db, blobs)
    }
}

impl<B: BlobStore> ReferentialIntegrityManager<B> {
    pub fn with_blob_store(db: Database, blobs: B) -> Self {
        Self { db, blobs }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    pub fn store(&self, collection: Collection) -> RecordStore {
        RecordStore::new(self.db.clone(), collection)
    }

    pub(crate) async fn exists(&self, collection: Collection, id: &RecordId) -> Result<bool> {
        match collection {
            Collection::Images => Ok(self.blobs.get_blob(id).await?.is_some()),
            other => Ok(self.store(other).get(id).await?.is_some()),
        }
    }

    async fn require(
        &self,
        collection: Collection,
        field: &str,
        target: Collection,
        id: &RecordId,
    ) -> Result<()> {
        if self.exists(target, id).await? {
            return Ok(());
        }
        Err(ValidationError::DanglingReference {
            collection,
            field: field.to_string(),
            target,
            id: id.clone(),
        }
        .into())
    }

    /// Read a reference field: `Ok(None)` if absent or null.
    fn reference(collection: Collection, doc: &Document, field: &str) -> Result<Option<RecordId>> {
        match doc.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => RecordId::from_value(value).map(Some).ok_or_else(|| {
                ValidationError::InvalidRecord {
                    collection: collection.name().to_string(),
                    reason: format!("'{}' is not a valid id", field),
                }
                .into()
            }),
        }
    }

    /// Create or update a restaurant after checking its references.
    ///
    /// The curator checked is the one the row will have after the write: the
    /// patch's `curatorId` if it sets one, otherwise the stored one. When
    /// `concept_ids` is given, the restaurant's concept links are made to
    /// match it exactly. Nothing is written if any reference is dangling.
    pub async fn save_restaurant(
        &self,
        restaurant: Document,
        concept_ids: Option<&[RecordId]>,
    ) -> Result<RecordId> {
        let restaurants = self.store(Collection::Restaurants);
        let stored = match RecordId::of(&restaurant, PRIMARY_KEY) {
            Some(id) => restaurants.get(&id).await?,
            None => None,
        };

        let mut effective = stored.clone().unwrap_or_default();
        shallow_merge(&mut effective, restaurant.clone());
        if let Some(curator_id) = Self::reference(Collection::Restaurants, &effective, "curatorId")? {
            self.require(Collection::Restaurants, "curatorId", Collection::Curators, &curator_id)
                .await?;
        }
        for concept_id in concept_ids.unwrap_or_default() {
            self.require(
                Collection::RestaurantConcepts,
                "conceptId",
                Collection::Concepts,
                concept_id,
            )
            .await?;
        }

        let mut patch = restaurant;
        if stored.is_none() && !patch.contains_key("status") {
            effective.insert("status".to_string(), json!("draft"));
            patch.insert("status".to_string(), json!("draft"));
        }
        Collection::Restaurants
            .descriptor()
            .validate_unkeyed(&effective)
            .map_err(|e| ValidationError::InvalidRecord {
                collection: Collection::Restaurants.name().to_string(),
                reason: e.to_string(),
            })?;

        let id = restaurants.put(patch).await?;
        if let Some(concept_ids) = concept_ids {
            self.sync_concepts(&id, concept_ids).await?;
        }
        debug!(id = %id, "restaurant saved");
        Ok(id)
    }

    async fn sync_concepts(&self, restaurant_id: &RecordId, concept_ids: &[RecordId]) -> Result<()> {
        let mut tx = self.store(Collection::RestaurantConcepts).begin().await?;
        let wanted: BTreeSet<&RecordId> = concept_ids.iter().collect();

        let mut linked = BTreeSet::new();
        for link in tx.get_by_index("restaurantId", &restaurant_id.to_value())? {
            let (Some(link_id), Some(concept_id)) = (
                RecordId::of(&link, PRIMARY_KEY),
                RecordId::of(&link, "conceptId"),
            ) else {
                continue;
            };
            if wanted.contains(&concept_id) {
                linked.insert(concept_id);
            } else {
                tx.delete(&link_id);
            }
        }

        for concept_id in wanted {
            if !linked.contains(concept_id) {
                tx.put(link_document(restaurant_id, concept_id))?;
            }
        }
        tx.commit().await
    }

    /// Link a restaurant to a concept. Returns the link id, reusing an
    /// existing link for the same pair.
    pub async fn link_concept(
        &self,
        restaurant_id: &RecordId,
        concept_id: &RecordId,
    ) -> Result<RecordId> {
        let links = Collection::RestaurantConcepts;
        self.require(links, "restaurantId", Collection::Restaurants, restaurant_id)
            .await?;
        self.require(links, "conceptId", Collection::Concepts, concept_id)
            .await?;

        let mut tx = self.store(links).begin().await?;
        let pair = json!([restaurant_id, concept_id]);
        if let Some(id) = tx
            .get_by_index("restaurantConcept", &pair)?
            .first()
            .and_then(|link| RecordId::of(link, PRIMARY_KEY))
        {
            return Ok(id);
        }
        let id = tx.put(link_document(restaurant_id, concept_id))?;
        tx.commit().await?;
        Ok(id)
    }

    /// [`Self::link_concept`] for a link given as a document.
    pub async fn save_link(&self, link: Document) -> Result<RecordId> {
        let links = Collection::RestaurantConcepts;
        let restaurant_id = Self::required_reference(links, &link, "restaurantId")?;
        let concept_id = Self::required_reference(links, &link, "conceptId")?;
        self.link_concept(&restaurant_id, &concept_id).await
    }

    /// Create or update a photo row after checking its restaurant and, when
    /// set, its image.
    pub async fn save_photo(&self, photo: Document) -> Result<RecordId> {
        let collection = Collection::RestaurantPhotos;
        let photos = self.store(collection);
        let mut effective = match RecordId::of(&photo, PRIMARY_KEY) {
            Some(id) => photos.get(&id).await?.unwrap_or_default(),
            None => Document::new(),
        };
        shallow_merge(&mut effective, photo.clone());

        let restaurant_id = Self::required_reference(collection, &effective, "restaurantId")?;
        self.require(collection, "restaurantId", Collection::Restaurants, &restaurant_id)
            .await?;
        if let Some(image_id) = Self::reference(collection, &effective, "imageId")? {
            self.require(collection, "imageId", Collection::Images, &image_id)
                .await?;
        }
        photos.put(photo).await
    }

    fn required_reference(collection: Collection, doc: &Document, field: &str) -> Result<RecordId> {
        Self::reference(collection, doc, field)?.ok_or_else(|| {
            ValidationError::MissingReference {
                collection,
                field: field.to_string(),
            }
            .into()
        })
    }

    /// Create or update a restaurant's location.
    ///
    /// A restaurant has at most one location: if it already has one, the
    /// fields are merged onto that row and its id is kept.
    pub async fn save_location(&self, location: Document) -> Result<RecordId> {
        let collection = Collection::RestaurantLocations;
        let restaurant_id = Self::required_reference(collection, &location, "restaurantId")?;
        self.require(collection, "restaurantId", Collection::Restaurants, &restaurant_id)
            .await?;

        let mut tx = self.store(collection).begin().await?;
        let current = match tx
            .get_by_index("restaurantId", &restaurant_id.to_value())?
            .into_iter()
            .next()
        {
            Some(row) => Some(row),
            None => RecordId::of(&location, PRIMARY_KEY).and_then(|id| tx.get(&id)),
        };

        let mut row = match current {
            Some(mut stored) => {
                let id = stored.get(PRIMARY_KEY).cloned();
                shallow_merge(&mut stored, location);
                if let Some(id) = id {
                    stored.insert(PRIMARY_KEY.to_string(), id);
                }
                stored
            }
            None => location,
        };
        row.insert(TIMESTAMP_FIELD.to_string(), Value::from(now_millis()));

        let id = tx.put(row)?;
        tx.commit().await?;
        Ok(id)
    }

    /// Store an image for a restaurant and the photo row that owns it.
    pub async fn add_photo(&self, restaurant_id: &RecordId, mut blob: ImageBlob) -> Result<Photo> {
        self.require(
            Collection::RestaurantPhotos,
            "restaurantId",
            Collection::Restaurants,
            restaurant_id,
        )
        .await?;

        blob.restaurant_id = Some(restaurant_id.clone());
        let image_id = self.blobs.put_blob(blob).await?;

        let mut photo = Photo::new(restaurant_id.clone(), Some(image_id.clone()));
        let photos = self.store(Collection::RestaurantPhotos);
        match photos.put(photo.to_document()?).await {
            Ok(id) => {
                photo.id = Some(id);
                Ok(photo)
            }
            Err(err) => {
                if let Err(cleanup) = self.blobs.delete_blob(&image_id).await {
                    warn!(image = %image_id, error = %cleanup, "could not remove unowned image");
                }
                Err(err)
            }
        }
    }

    /// Delete a restaurant and everything it owns: concept links, location,
    /// photos, and the images those photos reference.
    ///
    /// Each row is deleted on its own. A failure is recorded and the cascade
    /// carries on; if anything failed the result is
    /// [`Error::PartialFailure`] with the full report. A photo whose image
    /// could not be deleted is kept so that running the cascade again can
    /// finish the job. A missing restaurant is not an error: its leftover
    /// dependents are still removed.
    pub async fn cascade_delete_restaurant(&self, id: &RecordId) -> Result<CascadeReport> {
        let mut report = CascadeReport::new(id.clone());

        self.delete_row(&mut report, Collection::Restaurants, id).await;

        for collection in [Collection::RestaurantConcepts, Collection::RestaurantLocations] {
            for row_id in self.dependents(&mut report, collection, id).await {
                self.delete_row(&mut report, collection, &row_id).await;
            }
        }

        let photos = Collection::RestaurantPhotos;
        let rows = match self
            .store(photos)
            .get_by_index("restaurantId", &id.to_value())
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                report.fail(photos, id, "query", &err);
                Vec::new()
            }
        };
        for photo in rows {
            let Some(photo_id) = RecordId::of(&photo, PRIMARY_KEY) else {
                continue;
            };
            if let Some(image_id) = RecordId::of(&photo, "imageId") {
                match self.blobs.delete_blob(&image_id).await {
                    Ok(true) => report.record(Collection::Images),
                    Ok(false) => {}
                    Err(err) => {
                        report.fail(Collection::Images, &image_id, "delete", &err);
                        continue;
                    }
                }
            }
            self.delete_row(&mut report, photos, &photo_id).await;
        }

        if report.failures.is_empty() {
            info!(restaurant = %id, cleaned = ?report.cleaned, "cascade delete complete");
            Ok(report)
        } else {
            warn!(
                restaurant = %id,
                failures = report.failures.len(),
                "cascade delete incomplete"
            );
            Err(Error::partial(PartialFailure::Cascade(report)))
        }
    }

    async fn dependents(
        &self,
        report: &mut CascadeReport,
        collection: Collection,
        restaurant_id: &RecordId,
    ) -> Vec<RecordId> {
        match self
            .store(collection)
            .get_by_index("restaurantId", &restaurant_id.to_value())
            .await
        {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| RecordId::of(row, PRIMARY_KEY))
                .collect(),
            Err(err) => {
                report.fail(collection, restaurant_id, "query", &err);
                Vec::new()
            }
        }
    }

    async fn delete_row(&self, report: &mut CascadeReport, collection: Collection, id: &RecordId) {
        match self.store(collection).delete(id).await {
            Ok(true) => report.record(collection),
            Ok(false) => {}
            Err(err) => report.fail(collection, id, "delete", &err),
        }
    }

    /// Delete a curator that no restaurant references.
    pub async fn delete_curator(&self, id: &RecordId) -> Result<bool> {
        self.delete_protected(Collection::Curators, id, Collection::Restaurants, "curatorId")
            .await
    }

    /// Delete a concept that no restaurant is linked to.
    pub async fn delete_concept(&self, id: &RecordId) -> Result<bool> {
        self.delete_protected(
            Collection::Concepts,
            id,
            Collection::RestaurantConcepts,
            "conceptId",
        )
        .await
    }

    async fn delete_protected(
        &self,
        collection: Collection,
        id: &RecordId,
        dependent_collection: Collection,
        field: &str,
    ) -> Result<bool> {
        let dependents = self
            .store(dependent_collection)
            .get_by_index(field, &id.to_value())
            .await?
            .len();
        if dependents > 0 {
            return Err(ValidationError::DependentRows {
                collection,
                id: id.clone(),
                dependents,
                dependent_collection,
            }
            .into());
        }
        self.store(collection).delete(id).await
    }

    /// Every stored foreign key that does not resolve, in collection order.
    pub async fn audit(&self) -> Result<Vec<DanglingReference>> {
        let mut known: BTreeMap<Collection, HashSet<RecordId>> = BTreeMap::new();
        let mut dangling = Vec::new();

        for (collection, field, target) in FOREIGN_KEYS {
            for row in self.store(*collection).get_all().await? {
                let (Some(id), Some(target_id)) =
                    (RecordId::of(&row, PRIMARY_KEY), RecordId::of(&row, field))
                else {
                    continue;
                };

                let resolves = if *target == Collection::Images {
                    self.exists(*target, &target_id).await?
                } else {
                    if !known.contains_key(target) {
                        let ids = self
                            .store(*target)
                            .get_all()
                            .await?
                            .iter()
                            .filter_map(|r| RecordId::of(r, PRIMARY_KEY))
                            .collect();
                        known.insert(*target, ids);
                    }
                    known.get(target).is_some_and(|ids| ids.contains(&target_id))
                };

                if !resolves {
                    dangling.push(DanglingReference {
                        collection: *collection,
                        id,
                        field: field.to_string(),
                        target: *target,
                        target_id,
                    });
                }
            }
        }

        if !dangling.is_empty() {
            warn!(count = dangling.len(), "dangling references found");
        }
        Ok(dangling)
    }
}

fn link_document(restaurant_id: &RecordId, concept_id: &RecordId) -> Document {
    let mut doc = Document::new();
    doc.insert("restaurantId".to_string(), restaurant_id.to_value());
    doc.insert("conceptId".to_string(), concept_id.to_value());
    doc.insert(TIMESTAMP_FIELD.to_string(), Value::from(now_millis()));
    doc
}

//! Record handlers - CRUD, index queries and the validated restaurant writes.

use super::{parse_collection, parse_id};
use crate::error::{AppError, Result};
use curation_engine::{
    record::into_document, CascadeReport, Collection, Document, ImageBlob, Photo, RecordId,
    ReferentialIntegrityManager,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response for writes that produce an id.
#[derive(Debug, Serialize)]
pub struct SavedResponse {
    pub id: RecordId,
}

/// Response for deletes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    /// Whether the addressed row existed
    pub deleted: bool,
    /// What a restaurant cascade removed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade: Option<CascadeReport>,
}

/// Query for index lookups.
#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    /// JSON-encoded key. Text that is not valid JSON is taken as a string.
    pub value: String,
}

impl IndexQuery {
    fn key(&self) -> Value {
        serde_json::from_str(&self.value).unwrap_or_else(|_| Value::String(self.value.clone()))
    }
}

/// Request body for `POST /restaurants`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRestaurantRequest {
    pub restaurant: Document,
    /// When present, the restaurant's concept links are replaced by these
    #[serde(default)]
    pub concept_ids: Option<Vec<RecordId>>,
}

/// Every row of a collection.
pub async fn list_records(integrity: &ReferentialIntegrityManager, name: &str) -> Result<Vec<Document>> {
    let collection = parse_collection(name)?;
    Ok(integrity.store(collection).get_all().await?)
}

/// One row by id.
pub async fn get_record(
    integrity: &ReferentialIntegrityManager,
    name: &str,
    id: &str,
) -> Result<Document> {
    let collection = parse_collection(name)?;
    let id = parse_id(id);
    integrity
        .store(collection)
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} {}", collection.singular(), id)))
}

/// Insert or merge a row.
///
/// Collections holding foreign keys go through their reference checks;
/// the others are written as given.
pub async fn put_record(
    integrity: &ReferentialIntegrityManager,
    name: &str,
    body: Value,
) -> Result<RecordId> {
    let collection = parse_collection(name)?;
    let doc = into_document(body)
        .ok_or_else(|| AppError::BadRequest("record must be a JSON object".to_string()))?;

    let id = match collection {
        Collection::Restaurants => integrity.save_restaurant(doc, None).await?,
        Collection::RestaurantLocations => integrity.save_location(doc).await?,
        Collection::RestaurantConcepts => integrity.save_link(doc).await?,
        Collection::RestaurantPhotos => integrity.save_photo(doc).await?,
        _ => integrity.store(collection).put(doc).await?,
    };
    Ok(id)
}

/// Delete a row with the rule its collection calls for.
pub async fn delete_record(
    integrity: &ReferentialIntegrityManager,
    name: &str,
    id: &str,
) -> Result<DeleteResponse> {
    let collection = parse_collection(name)?;
    let id = parse_id(id);

    let response = match collection {
        Collection::Restaurants => {
            let report = integrity.cascade_delete_restaurant(&id).await?;
            DeleteResponse {
                deleted: report.cleaned(Collection::Restaurants) > 0,
                cascade: Some(report),
            }
        }
        Collection::Curators => DeleteResponse {
            deleted: integrity.delete_curator(&id).await?,
            cascade: None,
        },
        Collection::Concepts => DeleteResponse {
            deleted: integrity.delete_concept(&id).await?,
            cascade: None,
        },
        _ => DeleteResponse {
            deleted: integrity.store(collection).delete(&id).await?,
            cascade: None,
        },
    };
    Ok(response)
}

/// Exact-match lookup on a declared index.
pub async fn query_index(
    integrity: &ReferentialIntegrityManager,
    name: &str,
    index: &str,
    query: &IndexQuery,
) -> Result<Vec<Document>> {
    let collection = parse_collection(name)?;
    Ok(integrity
        .store(collection)
        .get_by_index(index, &query.key())
        .await?)
}

/// Validated restaurant save, optionally replacing its concept links.
pub async fn save_restaurant(
    integrity: &ReferentialIntegrityManager,
    request: SaveRestaurantRequest,
) -> Result<RecordId> {
    Ok(integrity
        .save_restaurant(request.restaurant, request.concept_ids.as_deref())
        .await?)
}

/// Store an image and the photo row linking it to a restaurant.
pub async fn add_photo(
    integrity: &ReferentialIntegrityManager,
    restaurant_id: &str,
    blob: ImageBlob,
) -> Result<Photo> {
    Ok(integrity.add_photo(&parse_id(restaurant_id), blob).await?)
}

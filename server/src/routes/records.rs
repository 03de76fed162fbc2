//! Record endpoint routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use curation_engine::{Document, ImageBlob, Photo};
use serde_json::Value;

use crate::error::Result;
use crate::handlers::{
    self, DeleteResponse, IndexQuery, SaveRestaurantRequest, SavedResponse,
};
use crate::AppState;

/// Create record routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/collections/{name}",
            get(list_handler).post(put_handler),
        )
        .route(
            "/collections/{name}/{id}",
            get(get_handler).delete(delete_handler),
        )
        .route("/collections/{name}/index/{index}", get(index_handler))
        .route("/restaurants", post(save_restaurant_handler))
        .route("/restaurants/{id}/photos", post(add_photo_handler))
}

/// GET /collections/{name} - Every row of a collection.
async fn list_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Document>>> {
    let records = handlers::list_records(&state.integrity, &name).await?;
    Ok(Json(records))
}

/// POST /collections/{name} - Insert or merge a row.
async fn put_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<SavedResponse>> {
    let id = handlers::put_record(&state.integrity, &name, body).await?;
    Ok(Json(SavedResponse { id }))
}

/// GET /collections/{name}/{id} - One row.
async fn get_handler(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Json<Document>> {
    let record = handlers::get_record(&state.integrity, &name, &id).await?;
    Ok(Json(record))
}

/// DELETE /collections/{name}/{id} - Delete with the collection's rule.
async fn delete_handler(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>> {
    let response = handlers::delete_record(&state.integrity, &name, &id).await?;
    Ok(Json(response))
}

/// GET /collections/{name}/index/{index}?value= - Index lookup.
async fn index_handler(
    State(state): State<AppState>,
    Path((name, index)): Path<(String, String)>,
    Query(query): Query<IndexQuery>,
) -> Result<Json<Vec<Document>>> {
    let records = handlers::query_index(&state.integrity, &name, &index, &query).await?;
    Ok(Json(records))
}

/// POST /restaurants - Validated restaurant save.
async fn save_restaurant_handler(
    State(state): State<AppState>,
    Json(request): Json<SaveRestaurantRequest>,
) -> Result<Json<SavedResponse>> {
    let id = handlers::save_restaurant(&state.integrity, request).await?;
    Ok(Json(SavedResponse { id }))
}

/// POST /restaurants/{id}/photos - Attach an image.
async fn add_photo_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(blob): Json<ImageBlob>,
) -> Result<(StatusCode, Json<Photo>)> {
    let photo = handlers::add_photo(&state.integrity, &id, blob).await?;
    Ok((StatusCode::CREATED, Json(photo)))
}

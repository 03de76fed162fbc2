//! Snapshot endpoint routes.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use curation_engine::{ImportReport, Snapshot};
use serde_json::Value;

use crate::error::Result;
use crate::handlers::{handle_export, handle_import, ExportQuery};
use crate::AppState;

/// Create snapshot routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/export", get(export_handler))
        .route("/import", post(import_handler))
}

/// GET /export - Export a snapshot.
async fn export_handler(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Json<Snapshot>> {
    let snapshot = handle_export(&state.transfer, query).await?;
    Ok(Json(snapshot))
}

/// POST /import - Merge a snapshot into the database.
async fn import_handler(
    State(state): State<AppState>,
    Json(snapshot): Json<Value>,
) -> Result<Json<ImportReport>> {
    let report = handle_import(&state.transfer, snapshot).await?;
    Ok(Json(report))
}

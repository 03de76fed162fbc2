//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use curation_engine::SchemaVersion;
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub schema_version: SchemaVersion,
    /// Whether the database lives on disk
    pub persistent: bool,
    pub import_chunk_size: usize,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = state.integrity.database();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: db.name().to_string(),
        schema_version: db.version(),
        persistent: state.config.data_dir.is_some(),
        import_chunk_size: state.config.import_chunk_size,
    })
}

/// Root handler.
async fn root() -> &'static str {
    "Restaurant Curation Store"
}

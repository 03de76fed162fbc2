//! Curation Server - HTTP host for the restaurant curation store.
//!
//! Exposes record CRUD, the validated restaurant writes, cascade and
//! protected deletes, and snapshot export/import over JSON.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;

use crate::config::Config;
use axum::Router;
use curation_engine::{
    ImportExportService, ReferentialIntegrityManager, SchemaRegistry, StorageEngine,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub integrity: ReferentialIntegrityManager,
    pub transfer: ImportExportService,
}

impl AppState {
    /// Open (creating or upgrading) the configured database.
    pub async fn open(config: Config) -> curation_engine::Result<Self> {
        let engine = StorageEngine::new(config.storage());
        let registry = SchemaRegistry::curation();
        let db = registry
            .open(&engine, &config.database_name, config.schema_version)
            .await?;

        let integrity = ReferentialIntegrityManager::new(db);
        let transfer = ImportExportService::new(registry, integrity.clone())
            .with_options(config.import_options());

        Ok(Self {
            config: Arc::new(config),
            integrity,
            transfer,
        })
    }
}

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

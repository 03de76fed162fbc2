//! Snapshot handlers - whole-database export and merge import.

use crate::error::{AppError, Result};
use curation_engine::{Collection, ImportExportService, ImportReport, Snapshot};
use serde::Deserialize;
use serde_json::Value;

/// Query for `GET /export`.
#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    /// Comma-separated collection names; all collections when absent
    pub collections: Option<String>,
}

impl ExportQuery {
    fn selected(&self) -> Result<Option<Vec<Collection>>> {
        let Some(list) = self.collections.as_deref() else {
            return Ok(None);
        };
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| {
                Collection::from_name(name)
                    .ok_or_else(|| AppError::BadRequest(format!("unknown collection '{}'", name)))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}

/// Export the requested collections.
pub async fn handle_export(transfer: &ImportExportService, query: ExportQuery) -> Result<Snapshot> {
    let selected = query.selected()?;
    Ok(transfer.export_all(selected.as_deref()).await?)
}

/// Validate and merge a snapshot into the database.
pub async fn handle_import(transfer: &ImportExportService, snapshot: Value) -> Result<ImportReport> {
    Ok(transfer.import_value(snapshot).await?)
}

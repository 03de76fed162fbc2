//! On-disk layout for a database directory.
//!
//! ```text
//! <data_dir>/<database>/schema.json        version + collection declarations
//! <data_dir>/<database>/<collection>.json  rows of one collection
//! ```
//!
//! Every file is replaced atomically: written to a `.tmp` sibling and then
//! renamed over the original.

use super::table::Table;
use crate::record::Document;
use crate::schema::IndexDescriptor;
use crate::SchemaVersion;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

const SCHEMA_FILE: &str = "schema.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaFile {
    version: SchemaVersion,
    collections: Vec<CollectionEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionEntry {
    name: String,
    key_path: String,
    indexes: Vec<IndexDescriptor>,
}

fn table_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.json", name))
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await
}

/// Load a database directory. `Ok(None)` when nothing has been stored yet.
pub(crate) async fn load(dir: &Path) -> io::Result<Option<(SchemaVersion, Vec<Table>)>> {
    let schema_bytes = match tokio::fs::read(dir.join(SCHEMA_FILE)).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let schema: SchemaFile = serde_json::from_slice(&schema_bytes)
        .map_err(|e| invalid_data(format!("{}: {}", SCHEMA_FILE, e)))?;

    let mut tables = Vec::with_capacity(schema.collections.len());
    for entry in schema.collections {
        let mut table = Table::new(entry.name.clone(), entry.key_path);
        for index in entry.indexes {
            table
                .add_index(index)
                .map_err(|e| invalid_data(e.to_string()))?;
        }

        let rows: Vec<Document> = match tokio::fs::read(table_path(dir, &entry.name)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| invalid_data(format!("{}.json: {}", entry.name, e)))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err),
        };
        for row in rows {
            table.put(row).map_err(|e| invalid_data(e.to_string()))?;
        }
        tables.push(table);
    }

    Ok(Some((schema.version, tables)))
}

/// Write the version and collection declarations.
pub(crate) async fn save_schema<'a>(
    dir: &Path,
    version: SchemaVersion,
    tables: impl Iterator<Item = &'a Table>,
) -> io::Result<()> {
    let schema = SchemaFile {
        version,
        collections: tables
            .map(|t| CollectionEntry {
                name: t.name().to_string(),
                key_path: t.key_path().to_string(),
                indexes: t.index_descriptors(),
            })
            .collect(),
    };
    let bytes = serde_json::to_vec_pretty(&schema).map_err(|e| invalid_data(e.to_string()))?;
    write_atomic(&dir.join(SCHEMA_FILE), &bytes).await
}

/// Write every row of one table.
pub(crate) async fn save_table(dir: &Path, table: &Table) -> io::Result<()> {
    let rows: Vec<&Document> = table.rows().collect();
    let bytes = serde_json::to_vec(&rows).map_err(|e| invalid_data(e.to_string()))?;
    write_atomic(&table_path(dir, table.name()), &bytes).await
}

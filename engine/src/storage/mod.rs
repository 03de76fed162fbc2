//! Versioned document storage.
//!
//! A [`StorageEngine`] holds named databases. Each database has a schema
//! version and a set of collections; every collection has a primary key path
//! and secondary indexes. Opening a database at a higher version runs an
//! upgrade callback against an [`Upgrade`] handle; opening it at a lower
//! version fails. Data is kept in memory and, when a data directory is
//! configured, mirrored to disk on every commit.

mod disk;
mod index;
mod table;
mod transaction;

pub use transaction::Transaction;

use crate::error::{Error, InitializationFailure, Result, ValidationError};
use crate::schema::IndexDescriptor;
use crate::SchemaVersion;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use table::Table;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Where databases are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per database. `None` keeps
    /// everything in memory.
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self { data_dir: None }
    }

    pub fn on_disk(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
        }
    }
}

struct DatabaseState {
    name: String,
    dir: Option<PathBuf>,
    version: AtomicU32,
    tables: RwLock<BTreeMap<String, Arc<Mutex<Table>>>>,
    connections: AtomicUsize,
}

impl DatabaseState {
    fn empty(name: &str, dir: Option<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            dir,
            version: AtomicU32::new(0),
            tables: RwLock::new(BTreeMap::new()),
            connections: AtomicUsize::new(0),
        }
    }
}

struct EngineInner {
    config: StorageConfig,
    databases: Mutex<HashMap<String, Arc<DatabaseState>>>,
}

/// Shared handle to all databases. Cloning is cheap.
#[derive(Clone)]
pub struct StorageEngine {
    inner: Arc<EngineInner>,
}

impl StorageEngine {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                databases: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(StorageConfig::in_memory())
    }

    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    /// Open a database at `version`, running `upgrade` when the stored
    /// version is lower.
    ///
    /// The upgrade is staged and applied all-or-nothing: if the callback
    /// fails, nothing it did is kept and the stored version is unchanged. An
    /// upgrade is refused while other connections to the database are open.
    pub async fn open<F>(&self, name: &str, version: SchemaVersion, upgrade: F) -> Result<Database>
    where
        F: FnOnce(&mut Upgrade) -> Result<()>,
    {
        let fail = |reason| Error::Initialization {
            database: name.to_string(),
            reason,
        };

        if version == 0 {
            return Err(fail(InitializationFailure::InvalidVersion));
        }

        let mut databases = self.inner.databases.lock().await;
        let state = match databases.get(name) {
            Some(state) => state.clone(),
            None => {
                let state = Arc::new(
                    self.load(name)
                        .await
                        .map_err(|e| fail(InitializationFailure::Storage(e.to_string())))?,
                );
                databases.insert(name.to_string(), state.clone());
                state
            }
        };

        let current = state.version.load(Ordering::SeqCst);
        if version < current {
            return Err(fail(InitializationFailure::VersionDowngrade {
                requested: version,
                stored: current,
            }));
        }

        if version > current {
            let open_connections = state.connections.load(Ordering::SeqCst);
            if open_connections > 0 {
                warn!(
                    database = name,
                    requested = version,
                    current,
                    open_connections,
                    "upgrade blocked by open connections"
                );
                return Err(fail(InitializationFailure::Blocked {
                    requested: version,
                    current,
                    open_connections,
                }));
            }
            run_upgrade(&state, current, version, upgrade).await?;
        }

        state.connections.fetch_add(1, Ordering::SeqCst);
        debug!(database = name, version, "database opened");
        Ok(Database {
            connection: Arc::new(Connection { state }),
        })
    }

    async fn load(&self, name: &str) -> std::io::Result<DatabaseState> {
        let dir = self.inner.config.data_dir.as_ref().map(|d| d.join(name));
        let mut state = DatabaseState::empty(name, dir.clone());
        if let Some(dir) = dir {
            if let Some((version, tables)) = disk::load(&dir).await? {
                info!(
                    database = name,
                    version,
                    collections = tables.len(),
                    "loaded database from disk"
                );
                state.version = AtomicU32::new(version);
                state.tables = RwLock::new(
                    tables
                        .into_iter()
                        .map(|t| (t.name().to_string(), Arc::new(Mutex::new(t))))
                        .collect(),
                );
            }
        }
        Ok(state)
    }
}

async fn run_upgrade<F>(
    state: &DatabaseState,
    current: SchemaVersion,
    version: SchemaVersion,
    callback: F,
) -> Result<()>
where
    F: FnOnce(&mut Upgrade) -> Result<()>,
{
    let fail = |reason| Error::Initialization {
        database: state.name.clone(),
        reason,
    };

    let mut staged = BTreeMap::new();
    for (name, table) in state.tables.read().await.iter() {
        staged.insert(name.clone(), table.lock().await.clone());
    }

    let mut upgrade = Upgrade {
        database: state.name.clone(),
        old_version: current,
        new_version: version,
        tables: staged,
        changed: BTreeSet::new(),
    };

    if let Err(err) = callback(&mut upgrade) {
        warn!(database = %state.name, error = %err, "upgrade failed; nothing applied");
        return Err(match err {
            Error::Initialization { .. } => err,
            other => fail(InitializationFailure::UpgradeFailed(other.to_string())),
        });
    }

    // Tables first, schema last: the schema file is what marks the new
    // version as present.
    if let Some(dir) = &state.dir {
        let persist = async {
            for name in &upgrade.changed {
                if let Some(table) = upgrade.tables.get(name) {
                    disk::save_table(dir, table).await?;
                }
            }
            disk::save_schema(dir, version, upgrade.tables.values()).await
        };
        persist
            .await
            .map_err(|e| fail(InitializationFailure::Storage(e.to_string())))?;
    }

    let mut tables = state.tables.write().await;
    for name in &upgrade.changed {
        if let Some(table) = upgrade.tables.remove(name) {
            tables.insert(name.clone(), Arc::new(Mutex::new(table)));
        }
    }
    state.version.store(version, Ordering::SeqCst);
    info!(
        database = %state.name,
        from = current,
        to = version,
        changed = upgrade.changed.len(),
        "schema upgraded"
    );
    Ok(())
}

/// Handle passed to the upgrade callback. Changes are staged and only become
/// visible if the whole callback succeeds.
pub struct Upgrade {
    database: String,
    old_version: SchemaVersion,
    new_version: SchemaVersion,
    tables: BTreeMap<String, Table>,
    changed: BTreeSet<String>,
}

impl Upgrade {
    /// Version stored before this upgrade; 0 for a new database.
    pub fn old_version(&self) -> SchemaVersion {
        self.old_version
    }

    pub fn new_version(&self) -> SchemaVersion {
        self.new_version
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn has_index(&self, collection: &str, index: &str) -> bool {
        self.tables
            .get(collection)
            .is_some_and(|t| t.has_index(index))
    }

    pub fn create_collection(&mut self, name: &str, key_path: &str) -> Result<()> {
        if self.tables.contains_key(name) {
            return Err(self.failed(format!("collection '{}' already exists", name)));
        }
        self.tables
            .insert(name.to_string(), Table::new(name, key_path));
        self.changed.insert(name.to_string());
        Ok(())
    }

    /// Add an index, building it over rows already in the collection.
    pub fn create_index(&mut self, collection: &str, index: IndexDescriptor) -> Result<()> {
        if self.has_index(collection, &index.name) {
            return Err(self.failed(format!(
                "index '{}' already exists on '{}'",
                index.name, collection
            )));
        }
        let table = self
            .tables
            .get_mut(collection)
            .ok_or_else(|| ValidationError::UnknownCollection(collection.to_string()))?;
        table.add_index(index)?;
        self.changed.insert(collection.to_string());
        Ok(())
    }

    fn failed(&self, reason: String) -> Error {
        Error::Initialization {
            database: self.database.clone(),
            reason: InitializationFailure::UpgradeFailed(reason),
        }
    }
}

struct Connection {
    state: Arc<DatabaseState>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.state.connections.fetch_sub(1, Ordering::SeqCst);
        debug!(database = %self.state.name, "connection closed");
    }
}

/// An open connection to one database. Clones share the connection; it is
/// released when the last clone is dropped.
#[derive(Clone)]
pub struct Database {
    connection: Arc<Connection>,
}

impl Database {
    fn state(&self) -> &DatabaseState {
        &self.connection.state
    }

    pub fn name(&self) -> &str {
        &self.state().name
    }

    pub fn version(&self) -> SchemaVersion {
        self.state().version.load(Ordering::SeqCst)
    }

    pub async fn has_collection(&self, name: &str) -> bool {
        self.state().tables.read().await.contains_key(name)
    }

    pub async fn collection_names(&self) -> Vec<String> {
        self.state().tables.read().await.keys().cloned().collect()
    }

    /// Names of the indexes declared on a collection.
    pub async fn index_names(&self, collection: &str) -> Result<Vec<String>> {
        let table = self.table(collection).await?;
        let table = table.lock().await;
        Ok(table
            .index_descriptors()
            .into_iter()
            .map(|i| i.name)
            .collect())
    }

    /// Begin a transaction over one collection, waiting for any transaction
    /// already holding it.
    pub async fn transaction(&self, collection: &str) -> Result<Transaction> {
        let table = self.table(collection).await?;
        let guard = table.lock_owned().await;
        Ok(Transaction::new(guard, self.state().dir.clone()))
    }

    async fn table(&self, name: &str) -> Result<Arc<Mutex<Table>>> {
        self.state()
            .tables
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownCollection(name.to_string()).into())
    }
}

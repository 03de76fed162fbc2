//! Configuration management for the server.

use curation_engine::{
    ImportOptions, SchemaVersion, StorageConfig, CURRENT_SCHEMA_VERSION, DEFAULT_CHUNK_SIZE,
    DEFAULT_DATABASE_NAME,
};
use std::env;
use std::path::PathBuf;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Directory the database is persisted to; in memory when unset
    pub data_dir: Option<PathBuf>,
    /// Name of the database to open
    pub database_name: String,
    /// Schema version requested on open
    pub schema_version: SchemaVersion,
    /// Rows per transaction during imports
    pub import_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            data_dir: None,
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            schema_version: CURRENT_SCHEMA_VERSION,
            import_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = env::var("HOST").unwrap_or(defaults.host);

        let port = match env::var("PORT") {
            Ok(port) => port.parse().map_err(|_| ConfigError::InvalidPort)?,
            Err(_) => defaults.port,
        };

        let data_dir = env::var("DATA_DIR")
            .ok()
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        let database_name = env::var("DATABASE_NAME").unwrap_or(defaults.database_name);

        let schema_version = match env::var("SCHEMA_VERSION") {
            Ok(version) => version
                .parse()
                .ok()
                .filter(|v| *v > 0)
                .ok_or(ConfigError::InvalidSchemaVersion)?,
            Err(_) => defaults.schema_version,
        };

        let import_chunk_size = match env::var("IMPORT_CHUNK_SIZE") {
            Ok(size) => size
                .parse()
                .ok()
                .filter(|s| *s > 0)
                .ok_or(ConfigError::InvalidChunkSize)?,
            Err(_) => defaults.import_chunk_size,
        };

        Ok(Self {
            host,
            port,
            data_dir,
            database_name,
            schema_version,
            import_chunk_size,
        })
    }

    pub fn storage(&self) -> StorageConfig {
        match &self.data_dir {
            Some(dir) => StorageConfig::on_disk(dir.clone()),
            None => StorageConfig::in_memory(),
        }
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            chunk_size: self.import_chunk_size,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("SCHEMA_VERSION must be a positive integer")]
    InvalidSchemaVersion,

    #[error("IMPORT_CHUNK_SIZE must be a positive integer")]
    InvalidChunkSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_in_memory() {
        let config = Config::default();
        assert!(config.data_dir.is_none());
        assert_eq!(config.storage(), StorageConfig::in_memory());
        assert_eq!(config.import_options(), ImportOptions::default());
    }

    #[test]
    fn data_dir_selects_disk_storage() {
        let config = Config {
            data_dir: Some(PathBuf::from("/var/lib/curation")),
            ..Config::default()
        };
        assert_eq!(
            config.storage(),
            StorageConfig::on_disk("/var/lib/curation")
        );
    }
}

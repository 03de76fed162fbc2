//! Error types for the curation engine.
//!
//! Four outcomes reach callers: the database could not be opened, a write was
//! rejected up front, an engine-level transaction aborted, or a multi-step
//! operation finished with some steps failed. Missing rows are never errors
//! at the [`crate::RecordStore`] level.

use crate::import_export::ImportReport;
use crate::integrity::CascadeReport;
use crate::record::RecordId;
use crate::schema::Collection;
use crate::SchemaVersion;
use thiserror::Error;

/// All possible errors from the curation engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("cannot open database '{database}': {reason}")]
    Initialization {
        database: String,
        reason: InitializationFailure,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("transaction on '{collection}' aborted: {reason}")]
    TransactionAbort { collection: String, reason: String },

    #[error(transparent)]
    PartialFailure(Box<PartialFailure>),
}

impl Error {
    pub(crate) fn partial(failure: PartialFailure) -> Self {
        Error::PartialFailure(Box::new(failure))
    }

    /// Whether the error is a [`ValidationError`].
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

/// Why a database could not be opened.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InitializationFailure {
    #[error("upgrade to version {requested} blocked by {open_connections} open connection(s) at version {current}")]
    Blocked {
        requested: SchemaVersion,
        current: SchemaVersion,
        open_connections: usize,
    },

    #[error("requested version {requested} is older than stored version {stored}")]
    VersionDowngrade {
        requested: SchemaVersion,
        stored: SchemaVersion,
    },

    #[error("version must be a positive integer")]
    InvalidVersion,

    #[error("upgrade failed: {0}")]
    UpgradeFailed(String),

    #[error("storage unavailable: {0}")]
    Storage(String),
}

/// A write or payload rejected before anything was changed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{collection} field '{field}' references missing {} {id}", .target.singular())]
    DanglingReference {
        collection: Collection,
        field: String,
        target: Collection,
        id: RecordId,
    },

    #[error("{collection} field '{field}' is required")]
    MissingReference { collection: Collection, field: String },

    #[error("{} {id} has {dependents} dependent {dependent_collection}", .collection.singular())]
    DependentRows {
        collection: Collection,
        id: RecordId,
        dependents: usize,
        dependent_collection: Collection,
    },

    #[error("unique index '{index}' on '{collection}' already holds key {key}")]
    UniqueViolation {
        collection: String,
        index: String,
        key: String,
    },

    #[error("malformed snapshot at {location}: {reason}")]
    MalformedSnapshot { location: String, reason: String },

    #[error("invalid record for '{collection}': {reason}")]
    InvalidRecord { collection: String, reason: String },

    #[error("collection not found: {0}")]
    UnknownCollection(String),

    #[error("index '{index}' not found on '{collection}'")]
    UnknownIndex { collection: String, index: String },

    #[error("invalid index key for '{index}': {reason}")]
    InvalidIndexKey { index: String, reason: String },
}

/// Structural problem with a single field.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },
}

/// A multi-step operation that completed with some steps failed. The report
/// says what was and was not done.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PartialFailure {
    #[error("cascade delete of restaurant {} left {} row(s) behind", .0.restaurant_id, .0.failures.len())]
    Cascade(CascadeReport),

    #[error("import finished with {} failed chunk(s)", .0.failures.len())]
    Import(ImportReport),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Request handlers for the curation store.

mod records;
mod snapshot;

pub use records::*;
pub use snapshot::*;

use crate::error::{AppError, Result};
use curation_engine::{Collection, RecordId, ValidationError};

/// Resolve a collection name from a request path.
pub fn parse_collection(name: &str) -> Result<Collection> {
    Collection::from_name(name)
        .ok_or_else(|| AppError::Engine(ValidationError::UnknownCollection(name.to_string()).into()))
}

/// Path segments that parse as integers address integer ids; anything else
/// is a text id.
pub fn parse_id(segment: &str) -> RecordId {
    segment
        .parse::<i64>()
        .map(RecordId::Int)
        .unwrap_or_else(|_| RecordId::Text(segment.to_string()))
}

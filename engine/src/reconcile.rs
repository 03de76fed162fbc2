//! Reconciliation of stored rows with incoming rows.
//!
//! Two strategies, both pure and deterministic:
//!
//! - [`merge_by_key`]: incoming rows overwrite stored rows with the same key;
//!   stored rows without an incoming counterpart are kept.
//! - [`merge_relationships`]: incoming rows are only appended when their key
//!   is not already present; stored rows are never replaced.
//!
//! # Ordering
//!
//! The result lists stored rows first, in their original order, with
//! replacements applied in place. New rows follow in the order their key
//! first appeared in `incoming`.
//!
//! Applying either merge twice with the same incoming rows gives the same
//! result as applying it once.

use crate::record::{Document, RecordId};
use crate::schema::PRIMARY_KEY;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// How a collection's imported rows are reconciled with its stored rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    /// Overwrite by primary key
    ByKey,
    /// Union on a composite key, never overwriting
    Relationship,
}

/// Result of a merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome<T> {
    /// The merged collection
    pub records: Vec<T>,
    /// Incoming rows whose key was new
    pub added: usize,
    /// Incoming rows that overwrote a row with the same key
    pub replaced: usize,
    /// Incoming rows that were not used: no key, or (for relationships) a
    /// key that was already present
    pub skipped: usize,
}

impl<T> MergeOutcome<T> {
    fn new(records: Vec<T>) -> Self {
        Self {
            records,
            added: 0,
            replaced: 0,
            skipped: 0,
        }
    }
}

/// Overlay `incoming` onto `existing` by key.
///
/// If `incoming` repeats a key, the later row wins. Stored rows without a
/// key are kept as they are; incoming rows without a key are skipped.
pub fn merge_by_key<T, K, F>(existing: Vec<T>, incoming: Vec<T>, key_of: F) -> MergeOutcome<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> Option<K>,
{
    let mut positions: HashMap<K, usize> = HashMap::with_capacity(existing.len());
    for (position, record) in existing.iter().enumerate() {
        if let Some(key) = key_of(record) {
            positions.insert(key, position);
        }
    }

    let mut outcome = MergeOutcome::new(existing);
    for record in incoming {
        let Some(key) = key_of(&record) else {
            outcome.skipped += 1;
            continue;
        };
        match positions.get(&key) {
            Some(&position) => {
                outcome.records[position] = record;
                outcome.replaced += 1;
            }
            None => {
                positions.insert(key, outcome.records.len());
                outcome.records.push(record);
                outcome.added += 1;
            }
        }
    }
    outcome
}

/// Append the rows of `incoming` whose key is not present yet.
///
/// If `incoming` repeats a key, the first row wins.
pub fn merge_relationships<T, K, F>(
    existing: Vec<T>,
    incoming: Vec<T>,
    key_of: F,
) -> MergeOutcome<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> Option<K>,
{
    let mut seen: HashSet<K> = existing.iter().filter_map(&key_of).collect();

    let mut outcome = MergeOutcome::new(existing);
    for record in incoming {
        match key_of(&record) {
            Some(key) if !seen.contains(&key) => {
                seen.insert(key);
                outcome.records.push(record);
                outcome.added += 1;
            }
            _ => outcome.skipped += 1,
        }
    }
    outcome
}

/// Composite key of a restaurant-concept row: `"{restaurantId}-{conceptId}"`.
///
/// `None` unless both ends are valid ids.
pub fn relationship_key(doc: &Document) -> Option<String> {
    let restaurant = RecordId::of(doc, "restaurantId")?;
    let concept = RecordId::of(doc, "conceptId")?;
    Some(format!("{}-{}", restaurant, concept))
}

/// Primary key of a document.
pub fn primary_key(doc: &Document) -> Option<RecordId> {
    RecordId::of(doc, PRIMARY_KEY)
}

/// Merge documents of one collection with the given strategy.
pub fn merge_documents(
    strategy: MergeStrategy,
    existing: Vec<Document>,
    incoming: Vec<Document>,
) -> MergeOutcome<Document> {
    match strategy {
        MergeStrategy::ByKey => merge_by_key(existing, incoming, primary_key),
        MergeStrategy::Relationship => merge_relationships(existing, incoming, relationship_key),
    }
}

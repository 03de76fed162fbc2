//! Collection declarations and the versioned schema upgrade.
//!
//! The [`SchemaRegistry`] is the only place that maps a typed [`Collection`]
//! onto storage: collection name, primary key path, secondary indexes, and
//! the structural field rules used to validate imported snapshots.

use crate::error::{FieldError, Result};
use crate::model::RestaurantStatus;
use crate::reconcile::MergeStrategy;
use crate::record::{Document, RecordId, TIMESTAMP_FIELD};
use crate::storage::{Database, StorageEngine, Upgrade};
use crate::SchemaVersion;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{info, warn};

/// Schema version this build declares.
pub const CURRENT_SCHEMA_VERSION: SchemaVersion = 1;

/// Database name used when none is configured.
pub const DEFAULT_DATABASE_NAME: &str = "restaurant-curator";

/// Primary key path shared by every collection.
pub const PRIMARY_KEY: &str = "id";

/// Typed collection symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Curators,
    Concepts,
    Restaurants,
    RestaurantLocations,
    RestaurantPhotos,
    Images,
    RestaurantConcepts,
}

impl Collection {
    /// Every collection, in dependency order: a collection only references
    /// collections listed before it.
    pub const ALL: [Collection; 7] = [
        Collection::Curators,
        Collection::Concepts,
        Collection::Restaurants,
        Collection::RestaurantLocations,
        Collection::Images,
        Collection::RestaurantPhotos,
        Collection::RestaurantConcepts,
    ];

    /// Storage name of the collection.
    pub fn name(self) -> &'static str {
        match self {
            Collection::Curators => "curators",
            Collection::Concepts => "concepts",
            Collection::Restaurants => "restaurants",
            Collection::RestaurantLocations => "restaurantLocations",
            Collection::RestaurantPhotos => "restaurantPhotos",
            Collection::Images => "images",
            Collection::RestaurantConcepts => "restaurantConcepts",
        }
    }

    /// Look a collection up by its storage name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Human-readable name of one row, used in error messages.
    pub fn singular(self) -> &'static str {
        match self {
            Collection::Curators => "curator",
            Collection::Concepts => "concept",
            Collection::Restaurants => "restaurant",
            Collection::RestaurantLocations => "location",
            Collection::RestaurantPhotos => "photo",
            Collection::Images => "image",
            Collection::RestaurantConcepts => "restaurant concept",
        }
    }

    /// How imported rows are reconciled with stored rows.
    pub fn merge_strategy(self) -> MergeStrategy {
        match self {
            Collection::RestaurantConcepts => MergeStrategy::Relationship,
            _ => MergeStrategy::ByKey,
        }
    }

    /// Default declaration of this collection.
    pub fn descriptor(self) -> CollectionDescriptor {
        let base = CollectionDescriptor::new(self);
        match self {
            Collection::Restaurants => base
                .with_index(IndexDescriptor::single("curatorId"))
                .with_index(IndexDescriptor::single("name"))
                .with_index(IndexDescriptor::single("status"))
                .with_index(IndexDescriptor::single(TIMESTAMP_FIELD))
                .with_field(FieldDef::required(PRIMARY_KEY, FieldType::Id))
                .with_field(FieldDef::required("name", FieldType::String))
                .with_field(FieldDef::optional(
                    "status",
                    FieldType::OneOf(RestaurantStatus::NAMES),
                ))
                .with_field(FieldDef::optional("curatorId", FieldType::Id))
                .with_field(FieldDef::optional("description", FieldType::String))
                .with_field(FieldDef::optional("transcription", FieldType::String))
                .with_field(FieldDef::optional(TIMESTAMP_FIELD, FieldType::Timestamp)),
            Collection::Curators => base
                .with_index(IndexDescriptor::single("name"))
                .with_field(FieldDef::required(PRIMARY_KEY, FieldType::Id))
                .with_field(FieldDef::required("name", FieldType::String))
                .with_field(FieldDef::optional("lastActive", FieldType::Timestamp))
                .with_field(FieldDef::optional(TIMESTAMP_FIELD, FieldType::Timestamp)),
            Collection::Concepts => base
                .with_index(IndexDescriptor::single("category"))
                .with_index(IndexDescriptor::single("value"))
                .with_field(FieldDef::required(PRIMARY_KEY, FieldType::Id))
                .with_field(FieldDef::required("category", FieldType::String))
                .with_field(FieldDef::required("value", FieldType::String))
                .with_field(FieldDef::optional(TIMESTAMP_FIELD, FieldType::Timestamp)),
            Collection::RestaurantConcepts => base
                .with_index(IndexDescriptor::single("restaurantId"))
                .with_index(IndexDescriptor::single("conceptId"))
                .with_index(
                    IndexDescriptor::compound("restaurantConcept", &["restaurantId", "conceptId"])
                        .unique(),
                )
                .with_field(FieldDef::optional(PRIMARY_KEY, FieldType::Id))
                .with_field(FieldDef::required("restaurantId", FieldType::Id))
                .with_field(FieldDef::required("conceptId", FieldType::Id)),
            Collection::RestaurantLocations => base
                .with_index(IndexDescriptor::single("restaurantId").unique())
                .with_field(FieldDef::required(PRIMARY_KEY, FieldType::Id))
                .with_field(FieldDef::required("restaurantId", FieldType::Id))
                .with_field(FieldDef::optional("latitude", FieldType::Float))
                .with_field(FieldDef::optional("longitude", FieldType::Float))
                .with_field(FieldDef::optional("address", FieldType::String)),
            Collection::RestaurantPhotos => base
                .with_index(IndexDescriptor::single("restaurantId"))
                .with_field(FieldDef::required(PRIMARY_KEY, FieldType::Id))
                .with_field(FieldDef::required("restaurantId", FieldType::Id))
                .with_field(FieldDef::optional("imageId", FieldType::Id)),
            Collection::Images => base
                .with_index(IndexDescriptor::single("restaurantId"))
                .with_field(FieldDef::required(PRIMARY_KEY, FieldType::Id))
                .with_field(FieldDef::required("data", FieldType::String))
                .with_field(FieldDef::optional("mimeType", FieldType::String))
                .with_field(FieldDef::optional("restaurantId", FieldType::Id)),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Field or field tuple an index is built over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    Single(String),
    Compound(Vec<String>),
}

impl KeyPath {
    /// Fields making up the key, in order.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            KeyPath::Single(field) => vec![field.as_str()],
            KeyPath::Compound(fields) => fields.iter().map(String::as_str).collect(),
        }
    }

    /// Extract the key from a document. `None` when any field is absent or
    /// null, in which case the row is left out of the index.
    pub fn extract(&self, doc: &Document) -> Option<Value> {
        match self {
            KeyPath::Single(field) => doc.get(field).filter(|v| !v.is_null()).cloned(),
            KeyPath::Compound(fields) => fields
                .iter()
                .map(|f| doc.get(f).filter(|v| !v.is_null()).cloned())
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
        }
    }
}

/// Declaration of one secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDescriptor {
    pub name: String,
    pub key_path: KeyPath,
    pub unique: bool,
}

impl IndexDescriptor {
    /// Non-unique index over one field, named after the field.
    pub fn single(field: &str) -> Self {
        Self {
            name: field.to_string(),
            key_path: KeyPath::Single(field.to_string()),
            unique: false,
        }
    }

    /// Non-unique index over several fields.
    pub fn compound(name: &str, fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            key_path: KeyPath::Compound(fields.iter().map(|f| f.to_string()).collect()),
            unique: false,
        }
    }

    /// Mark the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Field types checked during structural validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Epoch milliseconds or an ISO-8601 string
    Timestamp,
    /// Integer or non-empty string record id
    Id,
    /// One of a fixed set of strings
    OneOf(&'static [&'static str]),
    /// Arbitrary nested JSON
    Json,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Id => write!(f, "Id"),
            FieldType::OneOf(options) => write!(f, "one of [{}]", options.join(", ")),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Structural rule for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldDef {
    pub fn required(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: true,
        }
    }

    pub fn optional(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: false,
        }
    }

    /// Validate a field value against this definition.
    pub fn validate(&self, value: Option<&Value>) -> std::result::Result<(), FieldError> {
        match value {
            None | Some(Value::Null) if self.required => {
                Err(FieldError::MissingRequiredField(self.name.to_string()))
            }
            None | Some(Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &Value) -> std::result::Result<(), FieldError> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_number() || value.is_string(),
            FieldType::Id => RecordId::from_value(value).is_some(),
            FieldType::OneOf(options) => value.as_str().is_some_and(|s| options.contains(&s)),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(FieldError::TypeMismatch {
                field: self.name.to_string(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Declaration of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDescriptor {
    pub collection: Collection,
    pub key_path: String,
    pub indexes: Vec<IndexDescriptor>,
    pub fields: Vec<FieldDef>,
}

impl CollectionDescriptor {
    /// A collection keyed by `id` with no indexes and no field rules.
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            key_path: PRIMARY_KEY.to_string(),
            indexes: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn with_index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Check a record's shape against the declared fields. Undeclared fields
    /// are allowed.
    pub fn validate_document(&self, doc: &Document) -> std::result::Result<(), FieldError> {
        for field in &self.fields {
            field.validate(doc.get(field.name))?;
        }
        Ok(())
    }

    /// Same as [`CollectionDescriptor::validate_document`], but the primary
    /// key may be absent. Used before an insert that assigns the key.
    pub fn validate_unkeyed(&self, doc: &Document) -> std::result::Result<(), FieldError> {
        for field in self.fields.iter().filter(|f| f.name != self.key_path) {
            field.validate(doc.get(field.name))?;
        }
        match doc.get(&self.key_path) {
            None | Some(Value::Null) => Ok(()),
            Some(_) => self
                .fields
                .iter()
                .filter(|f| f.name == self.key_path)
                .try_for_each(|f| f.validate(doc.get(f.name))),
        }
    }
}

/// What an upgrade will add.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradePlan {
    pub collections: Vec<Collection>,
    pub indexes: Vec<(Collection, IndexDescriptor)>,
}

impl UpgradePlan {
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty() && self.indexes.is_empty()
    }
}

/// The set of declared collections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRegistry {
    collections: Vec<CollectionDescriptor>,
}

impl SchemaRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            collections: Vec::new(),
        }
    }

    /// The full restaurant curation schema.
    pub fn curation() -> Self {
        Collection::ALL
            .into_iter()
            .fold(Self::new(), |registry, c| registry.with_collection(c.descriptor()))
    }

    /// Declare a collection, replacing any earlier declaration of it.
    pub fn with_collection(mut self, descriptor: CollectionDescriptor) -> Self {
        self.collections
            .retain(|d| d.collection != descriptor.collection);
        self.collections.push(descriptor);
        self
    }

    /// Drop a collection from the declaration. Stored data is unaffected.
    pub fn without_collection(mut self, collection: Collection) -> Self {
        self.collections.retain(|d| d.collection != collection);
        self
    }

    pub fn collections(&self) -> &[CollectionDescriptor] {
        &self.collections
    }

    pub fn descriptor(&self, collection: Collection) -> Option<&CollectionDescriptor> {
        self.collections.iter().find(|d| d.collection == collection)
    }

    /// Compute what is missing from the engine's current state. Existing
    /// collections and indexes are never part of a plan.
    pub fn plan_upgrade(&self, upgrade: &Upgrade) -> UpgradePlan {
        let mut plan = UpgradePlan::default();
        for descriptor in &self.collections {
            let name = descriptor.collection.name();
            let exists = upgrade.has_collection(name);
            if !exists {
                plan.collections.push(descriptor.collection);
            }
            for index in &descriptor.indexes {
                if !exists || !upgrade.has_index(name, &index.name) {
                    plan.indexes.push((descriptor.collection, index.clone()));
                }
            }
        }
        plan
    }

    fn apply(&self, upgrade: &mut Upgrade, plan: &UpgradePlan) -> Result<()> {
        for collection in &plan.collections {
            let key_path = self
                .descriptor(*collection)
                .map(|d| d.key_path.as_str())
                .unwrap_or(PRIMARY_KEY);
            upgrade.create_collection(collection.name(), key_path)?;
        }
        for (collection, index) in &plan.indexes {
            upgrade.create_index(collection.name(), index.clone())?;
        }
        Ok(())
    }

    /// Open (creating or upgrading as needed) a database with this schema.
    ///
    /// Upgrading only ever adds collections and indexes. A blocked upgrade
    /// fails with [`crate::Error::Initialization`]; retrying is up to the
    /// caller.
    pub async fn open(
        &self,
        engine: &StorageEngine,
        name: &str,
        version: SchemaVersion,
    ) -> Result<Database> {
        let db = engine
            .open(name, version, |upgrade| {
                let plan = self.plan_upgrade(upgrade);
                info!(
                    database = name,
                    from = upgrade.old_version(),
                    to = upgrade.new_version(),
                    collections = plan.collections.len(),
                    indexes = plan.indexes.len(),
                    "upgrading schema"
                );
                self.apply(upgrade, &plan)
            })
            .await?;

        for descriptor in &self.collections {
            if !db.has_collection(descriptor.collection.name()).await {
                warn!(
                    database = name,
                    collection = %descriptor.collection,
                    version,
                    "declared collection missing; bump the schema version to create it"
                );
            }
        }

        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::into_document;
    use serde_json::json;

    #[test]
    fn collection_names_round_trip() {
        for collection in Collection::ALL {
            assert_eq!(Collection::from_name(collection.name()), Some(collection));
        }
        assert_eq!(Collection::from_name("nope"), None);
    }

    #[test]
    fn collection_serializes_as_storage_name() {
        for collection in Collection::ALL {
            let json = serde_json::to_string(&collection).unwrap();
            assert_eq!(json, format!("\"{}\"", collection.name()));
        }
    }

    #[test]
    fn dependency_order_lists_targets_first() {
        let position = |c: Collection| Collection::ALL.iter().position(|&x| x == c);
        for (collection, _, target) in crate::integrity::FOREIGN_KEYS {
            assert!(position(*target) < position(*collection), "{} before {}", target, collection);
        }
    }

    #[test]
    fn only_join_collection_merges_as_relationship() {
        for collection in Collection::ALL {
            let expected = if collection == Collection::RestaurantConcepts {
                MergeStrategy::Relationship
            } else {
                MergeStrategy::ByKey
            };
            assert_eq!(collection.merge_strategy(), expected);
        }
    }

    #[test]
    fn declared_unique_indexes() {
        let registry = SchemaRegistry::curation();
        let unique: Vec<_> = registry
            .collections()
            .iter()
            .flat_map(|d| {
                d.indexes
                    .iter()
                    .filter(|i| i.unique)
                    .map(move |i| (d.collection, i.name.clone()))
            })
            .collect();
        assert_eq!(
            unique,
            vec![
                (Collection::RestaurantLocations, "restaurantId".to_string()),
                (
                    Collection::RestaurantConcepts,
                    "restaurantConcept".to_string()
                ),
            ]
        );
    }

    #[test]
    fn key_path_extract() {
        let doc = into_document(json!({"restaurantId": 1, "conceptId": 5, "x": null})).unwrap();
        assert_eq!(
            KeyPath::Single("restaurantId".into()).extract(&doc),
            Some(json!(1))
        );
        assert_eq!(KeyPath::Single("x".into()).extract(&doc), None);
        assert_eq!(KeyPath::Single("missing".into()).extract(&doc), None);
        assert_eq!(
            KeyPath::Compound(vec!["restaurantId".into(), "conceptId".into()]).extract(&doc),
            Some(json!([1, 5]))
        );
        assert_eq!(
            KeyPath::Compound(vec!["restaurantId".into(), "x".into()]).extract(&doc),
            None
        );
    }

    #[test]
    fn key_path_serializes_untagged() {
        let single = serde_json::to_value(KeyPath::Single("name".into())).unwrap();
        assert_eq!(single, json!("name"));
        let compound: KeyPath = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(compound, KeyPath::Compound(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn validate_restaurant_shape() {
        let descriptor = Collection::Restaurants.descriptor();

        let ok = into_document(json!({"id": 1, "name": "Noma", "status": "draft"})).unwrap();
        assert!(descriptor.validate_document(&ok).is_ok());

        let missing = into_document(json!({"id": 1})).unwrap();
        assert!(matches!(
            descriptor.validate_document(&missing),
            Err(FieldError::MissingRequiredField(f)) if f == "name"
        ));

        let bad_status = into_document(json!({"id": 1, "name": "N", "status": "open"})).unwrap();
        assert!(matches!(
            descriptor.validate_document(&bad_status),
            Err(FieldError::TypeMismatch { field, .. }) if field == "status"
        ));

        let bad_id = into_document(json!({"id": {"nested": 1}, "name": "N"})).unwrap();
        assert!(matches!(
            descriptor.validate_document(&bad_id),
            Err(FieldError::TypeMismatch { field, .. }) if field == "id"
        ));
    }

    #[test]
    fn relationship_rows_do_not_need_an_id() {
        let descriptor = Collection::RestaurantConcepts.descriptor();
        let row = into_document(json!({"restaurantId": 1, "conceptId": 5})).unwrap();
        assert!(descriptor.validate_document(&row).is_ok());
    }

    #[test]
    fn timestamps_accept_numbers_and_strings() {
        let def = FieldDef::optional("lastActive", FieldType::Timestamp);
        assert!(def.validate(Some(&json!(1706745600000i64))).is_ok());
        assert!(def.validate(Some(&json!("2024-02-01T00:00:00Z"))).is_ok());
        assert!(def.validate(Some(&json!(true))).is_err());
    }

    #[test]
    fn field_type_display() {
        assert_eq!(FieldType::String.to_string(), "String");
        assert_eq!(FieldType::Id.to_string(), "Id");
        assert_eq!(
            FieldType::OneOf(&["a", "b"]).to_string(),
            "one of [a, b]"
        );
    }

    #[test]
    fn with_collection_replaces_declaration() {
        let registry = SchemaRegistry::new()
            .with_collection(CollectionDescriptor::new(Collection::Curators))
            .with_collection(Collection::Curators.descriptor());
        assert_eq!(registry.collections().len(), 1);
        assert_eq!(
            registry.descriptor(Collection::Curators),
            Some(&Collection::Curators.descriptor())
        );
    }
}

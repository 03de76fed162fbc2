//! Typed entities for the curation collections.
//!
//! The store keeps schemaless [`Document`]s; these structs are the typed view
//! callers usually work with. Absent optional fields are left out of the
//! serialized document, so writing an entity through
//! [`crate::RecordStore::put_entity`] only touches the fields it sets.

use crate::error::{Result, ValidationError};
use crate::record::{into_document, Document, RecordId};
use crate::schema::Collection;
use crate::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A stored time: epoch milliseconds as written by the store, or text
/// (typically RFC 3339) as carried by imported snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    Millis(Timestamp),
    Fractional(f64),
    Text(String),
}

impl TimeValue {
    /// Epoch milliseconds, if the value can be read as a point in time.
    pub fn as_millis(&self) -> Option<Timestamp> {
        match self {
            TimeValue::Millis(ms) => Some(*ms),
            TimeValue::Fractional(ms) if ms.is_finite() => Some(*ms as Timestamp),
            TimeValue::Fractional(_) => None,
            TimeValue::Text(text) => chrono::DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|t| t.timestamp_millis()),
        }
    }
}

impl From<Timestamp> for TimeValue {
    fn from(ms: Timestamp) -> Self {
        TimeValue::Millis(ms)
    }
}

/// Editorial state of a restaurant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestaurantStatus {
    #[default]
    Draft,
    Revised,
    Production,
    Archived,
}

impl RestaurantStatus {
    /// Serialized names, in declaration order.
    pub const NAMES: &'static [&'static str] = &["draft", "revised", "production", "archived"];

    pub fn as_str(self) -> &'static str {
        match self {
            RestaurantStatus::Draft => "draft",
            RestaurantStatus::Revised => "revised",
            RestaurantStatus::Production => "production",
            RestaurantStatus::Archived => "archived",
        }
    }
}

/// A typed row of one collection.
pub trait Entity: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    fn id(&self) -> Option<&RecordId>;

    fn to_document(&self) -> Result<Document> {
        let invalid = |reason: String| ValidationError::InvalidRecord {
            collection: Self::COLLECTION.name().to_string(),
            reason,
        };
        let value = serde_json::to_value(self).map_err(|e| invalid(e.to_string()))?;
        Ok(into_document(value).ok_or_else(|| invalid("not a JSON object".to_string()))?)
    }

    fn from_document(doc: Document) -> Result<Self> {
        serde_json::from_value(serde_json::Value::Object(doc)).map_err(|e| {
            ValidationError::InvalidRecord {
                collection: Self::COLLECTION.name().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

macro_rules! entity {
    ($ty:ty, $collection:expr) => {
        impl Entity for $ty {
            const COLLECTION: Collection = $collection;

            fn id(&self) -> Option<&RecordId> {
                self.id.as_ref()
            }
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Restaurant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RestaurantStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curator_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimeValue>,
}

impl Restaurant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_curator(mut self, curator_id: impl Into<RecordId>) -> Self {
        self.curator_id = Some(curator_id.into());
        self
    }

    pub fn with_status(mut self, status: RestaurantStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Stored status, `draft` when unset.
    pub fn status(&self) -> RestaurantStatus {
        self.status.unwrap_or_default()
    }
}

entity!(Restaurant, Collection::Restaurants);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Curator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// When the curator was last active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<TimeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimeValue>,
}

impl Curator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

entity!(Curator, Collection::Curators);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub category: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimeValue>,
}

impl Concept {
    pub fn new(category: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

entity!(Concept, Collection::Concepts);

/// Join row linking a restaurant to a concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantConcept {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub restaurant_id: RecordId,
    pub concept_id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimeValue>,
}

impl RestaurantConcept {
    pub fn new(restaurant_id: impl Into<RecordId>, concept_id: impl Into<RecordId>) -> Self {
        Self {
            id: None,
            restaurant_id: restaurant_id.into(),
            concept_id: concept_id.into(),
            timestamp: None,
        }
    }
}

entity!(RestaurantConcept, Collection::RestaurantConcepts);

/// Where a restaurant is. At most one per restaurant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub restaurant_id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimeValue>,
}

impl Location {
    pub fn new(restaurant_id: impl Into<RecordId>) -> Self {
        Self {
            id: None,
            restaurant_id: restaurant_id.into(),
            latitude: None,
            longitude: None,
            address: None,
            city: None,
            country: None,
            timestamp: None,
        }
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

entity!(Location, Collection::RestaurantLocations);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub restaurant_id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimeValue>,
}

impl Photo {
    pub fn new(restaurant_id: impl Into<RecordId>, image_id: Option<RecordId>) -> Self {
        Self {
            id: None,
            restaurant_id: restaurant_id.into(),
            image_id,
            timestamp: None,
        }
    }
}

entity!(Photo, Collection::RestaurantPhotos);

/// Image payload. `data` is opaque to the store (typically base64).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBlob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restaurant_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimeValue>,
}

impl ImageBlob {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            id: None,
            data: data.into(),
            mime_type: None,
            restaurant_id: None,
            timestamp: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

entity!(ImageBlob, Collection::Images);

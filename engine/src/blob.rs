//! Image payload storage.

use crate::error::Result;
use crate::model::{Entity, ImageBlob};
use crate::record::RecordId;
use crate::schema::Collection;
use crate::storage::Database;
use crate::store::RecordStore;
use std::future::Future;

/// Where image payloads live.
///
/// The integrity manager only reaches blobs through this trait, so callers
/// can put images somewhere other than the `images` collection.
pub trait BlobStore: Clone + Send + Sync + 'static {
    /// Store a blob and return its id.
    fn put_blob(&self, blob: ImageBlob) -> impl Future<Output = Result<RecordId>> + Send;

    fn get_blob(&self, id: &RecordId) -> impl Future<Output = Result<Option<ImageBlob>>> + Send;

    /// Remove a blob. Returns whether it existed; removing an absent blob
    /// succeeds with `false`.
    fn delete_blob(&self, id: &RecordId) -> impl Future<Output = Result<bool>> + Send;
}

/// Blobs kept as rows of the `images` collection.
#[derive(Clone)]
pub struct ImageStore {
    images: RecordStore,
}

impl ImageStore {
    pub fn new(db: Database) -> Self {
        Self {
            images: RecordStore::new(db, Collection::Images),
        }
    }
}

impl BlobStore for ImageStore {
    async fn put_blob(&self, blob: ImageBlob) -> Result<RecordId> {
        self.images.put(blob.to_document()?).await
    }

    async fn get_blob(&self, id: &RecordId) -> Result<Option<ImageBlob>> {
        self.images.get_entity(id).await
    }

    async fn delete_blob(&self, id: &RecordId) -> Result<bool> {
        self.images.delete(id).await
    }
}

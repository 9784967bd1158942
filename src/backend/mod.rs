//! Capabilities this layer consumes from the remote API.
//!
//! `Loader` covers reads, `MutationBackend` covers writes. Both are async and
//! object safe so a client can hold them behind `Arc<dyn ...>`.

pub mod http;
pub mod memory;

use async_trait::async_trait;

use crate::cache::ListParams;
use crate::error::Result;
use crate::model::{Collection, CollectionChanges, Fields, NewCollection, RecordItem, RecordPage};

#[async_trait]
pub trait Loader: Send + Sync {
  async fn list_collections(&self) -> Result<Vec<Collection>>;

  async fn list_records(&self, collection: &str, params: &ListParams) -> Result<RecordPage>;

  async fn get_record(&self, collection: &str, id: &str) -> Result<RecordItem>;
}

#[async_trait]
pub trait MutationBackend: Send + Sync {
  async fn create_record(&self, collection: &str, fields: &Fields) -> Result<RecordItem>;

  async fn replace_record(&self, collection: &str, id: &str, fields: &Fields)
    -> Result<RecordItem>;

  async fn patch_record(&self, collection: &str, id: &str, fields: &Fields) -> Result<RecordItem>;

  async fn delete_record(&self, collection: &str, id: &str) -> Result<()>;

  async fn create_collection(&self, collection: &NewCollection) -> Result<Collection>;

  async fn update_collection(&self, slug: &str, changes: &CollectionChanges)
    -> Result<Collection>;

  async fn delete_collection(&self, slug: &str) -> Result<()>;
}

pub use http::HttpBackend;
pub use memory::{MemoryBackend, Operation};

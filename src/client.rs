//! Client facade tying loaders, cache, mutations and the deletion guard together.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

use crate::backend::{Loader, MutationBackend};
use crate::cache::{
  CacheResult, CacheStore, Cacheable, FetchCoordinator, ListParams, Resource, ResourceKey,
};
use crate::error::{Result, SyncError};
use crate::guard::{DeletionGuard, EntityRef};
use crate::model::{Collection, RecordItem, RecordPage};
use crate::mutation::{Mutation, MutationExecutor, MutationHandle, MutationKind, MutationOutput};
use crate::query::Query;

/// Synchronization context handed to every view and command.
///
/// Cloning is cheap and shares the same cache and guard. Create separate
/// clients to get isolated caches (e.g. per test).
#[derive(Clone)]
pub struct SyncClient {
  loader: Arc<dyn Loader>,
  coordinator: FetchCoordinator,
  executor: MutationExecutor,
  guard: DeletionGuard,
}

impl SyncClient {
  /// Create a client with a fresh cache over a backend providing both capabilities.
  pub fn new<B>(backend: B) -> Self
  where
    B: Loader + MutationBackend + 'static,
  {
    let backend = Arc::new(backend);
    Self::from_parts(
      backend.clone(),
      backend,
      CacheStore::new(),
      DeletionGuard::new(),
    )
  }

  pub fn from_parts(
    loader: Arc<dyn Loader>,
    mutations: Arc<dyn MutationBackend>,
    store: CacheStore,
    guard: DeletionGuard,
  ) -> Self {
    Self {
      loader,
      coordinator: FetchCoordinator::new(store.clone()),
      executor: MutationExecutor::new(mutations, store, guard.clone()),
      guard,
    }
  }

  pub fn store(&self) -> &CacheStore {
    self.coordinator.store()
  }

  pub fn guard(&self) -> &DeletionGuard {
    &self.guard
  }

  /// Resolve `key` through the cache using the matching loader call.
  pub async fn resolve<T: Cacheable>(&self, key: ResourceKey) -> Result<CacheResult<T>> {
    let load = self.load::<T>(key.clone());
    self.coordinator.resolve(key, move || load).await
  }

  /// Wait for a freshly loaded value of `key`, bypassing fresh and stale entries.
  pub async fn refresh<T: Cacheable>(&self, key: ResourceKey) -> Result<T> {
    let load = self.load::<T>(key.clone());
    self.coordinator.force_refresh(key, move || load).await
  }

  pub async fn collections(&self) -> Result<CacheResult<Vec<Collection>>> {
    self.resolve(ResourceKey::collections()).await
  }

  pub async fn listing(&self, slug: &str, params: ListParams) -> Result<CacheResult<RecordPage>> {
    self.resolve(ResourceKey::listing(slug, params)).await
  }

  pub async fn record(&self, slug: &str, id: &str) -> Result<CacheResult<RecordItem>> {
    self.resolve(ResourceKey::record(slug, id)).await
  }

  /// Reactive view of a listing. Starts loading immediately.
  ///
  /// Must be called from within a tokio runtime.
  pub fn use_listing(&self, slug: &str, params: ListParams) -> Query<RecordPage> {
    Query::new(self.clone(), ResourceKey::listing(slug, params))
  }

  /// Reactive view of one record. Starts loading immediately.
  pub fn use_record(&self, slug: &str, id: &str) -> Query<RecordItem> {
    Query::new(self.clone(), ResourceKey::record(slug, id))
  }

  /// Reactive view of the collection index. Starts loading immediately.
  pub fn use_collections(&self) -> Query<Vec<Collection>> {
    Query::new(self.clone(), ResourceKey::collections())
  }

  /// Callable record mutation of `kind` on `slug`.
  pub fn use_mutation(&self, kind: MutationKind, slug: &str) -> MutationHandle {
    MutationHandle::new(self.executor.clone(), kind, slug.to_string())
  }

  pub async fn execute(&self, mutation: Mutation) -> Result<MutationOutput> {
    self.executor.execute(mutation).await
  }

  /// Whether a delete of record `id` in `slug` is in flight.
  pub fn is_deleting(&self, slug: &str, id: &str) -> bool {
    self.guard.is_deleting(&EntityRef::record(slug, id))
  }

  /// Build the loader call for `key` without running it.
  fn load<T: Cacheable>(&self, key: ResourceKey) -> BoxFuture<'static, Result<T>> {
    let loader = Arc::clone(&self.loader);
    async move {
      let resource = match &key {
        ResourceKey::Collections => Resource::Collections(loader.list_collections().await?),
        ResourceKey::Listing { collection, params } => {
          Resource::Records(loader.list_records(collection, params).await?)
        }
        ResourceKey::Record { collection, id } => {
          Resource::Record(loader.get_record(collection, id).await?)
        }
      };

      let found = resource.kind();
      T::from_resource(resource).ok_or_else(|| SyncError::KindMismatch {
        key: key.canonical(),
        expected: T::kind(),
        found,
      })
    }
    .boxed()
  }
}

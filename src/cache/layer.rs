//! Fetch coordination on top of the cache store.

use futures::FutureExt;
use std::future::Future;
use tracing::debug;

use super::key::ResourceKey;
use super::store::{CacheStore, Freshness, LoadFuture, LoadHandle};
use super::traits::{CacheResult, Cacheable, Resource};
use crate::error::{Result, SyncError};

/// Resolves keys through the cache, issuing at most one load per key at a time.
///
/// Stale entries are served immediately while a background load refreshes
/// them (stale-while-revalidate). Loader errors are stored on the entry and
/// returned; nothing is retried here.
#[derive(Clone)]
pub struct FetchCoordinator {
  store: CacheStore,
}

impl FetchCoordinator {
  pub fn new(store: CacheStore) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  /// Resolve `key`, calling `loader` only when the cache cannot answer.
  ///
  /// 1. Fresh entry: return it, `loader` is not called
  /// 2. Stale entry with a value: return the value and refresh in the background
  /// 3. Missing or errored entry: load, store and return the result
  ///
  /// Concurrent calls for a key that is loading attach to the same load.
  pub async fn resolve<T, F, Fut>(&self, key: ResourceKey, loader: F) -> Result<CacheResult<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    if let Some(entry) = self.store.get(&key) {
      match (entry.freshness(), entry.value()) {
        (Freshness::Fresh, Some(value)) => {
          debug!(key = %key, "cache hit");
          let data = downcast::<T>(&key, value.clone())?;
          return Ok(CacheResult::from_cache(data, entry.resolved_at(), false));
        }
        (Freshness::Stale | Freshness::Loading, Some(value)) => {
          debug!(key = %key, "serving stale value while revalidating");
          let data = downcast::<T>(&key, value.clone())?;
          let _ = self.begin_load(&key, loader);
          return Ok(CacheResult::from_cache(data, entry.resolved_at(), true));
        }
        _ => {}
      }
    }

    debug!(key = %key, "cache miss");
    let resource = self.begin_load(&key, loader).await?;
    let data = downcast::<T>(&key, resource)?;
    let resolved_at = self.store.get(&key).and_then(|e| e.resolved_at());
    Ok(CacheResult::from_network(data, resolved_at))
  }

  /// Resolve `key` and wait for a value loaded after this call started,
  /// or for the load already in flight.
  pub async fn force_refresh<T, F, Fut>(&self, key: ResourceKey, loader: F) -> Result<T>
  where
    T: Cacheable,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let resource = self.begin_load(&key, loader).await?;
    downcast::<T>(&key, resource)
  }

  /// Start a load for `key` or attach to the one in flight.
  ///
  /// Installed loads run on their own task, so they complete and write back
  /// even if every caller stops waiting.
  fn begin_load<T, F, Fut>(&self, key: &ResourceKey, loader: F) -> LoadFuture
  where
    T: Cacheable,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let id = self.store.next_load_id();
    let store = self.store.clone();
    let load_key = key.clone();

    let future = async move {
      let result = loader().await.map(Cacheable::into_resource);
      store.complete(&load_key, id, &result);
      result
    }
    .boxed()
    .shared();

    let (handle, installed) = self.store.mark_loading(key.clone(), LoadHandle { id, future });

    if installed {
      debug!(key = %key, load_id = handle.id, "load started");
      tokio::spawn(handle.future.clone());
    } else {
      debug!(key = %key, load_id = handle.id, "attached to in-flight load");
    }

    handle.future
  }
}

fn downcast<T: Cacheable>(key: &ResourceKey, resource: Resource) -> Result<T> {
  let found = resource.kind();
  T::from_resource(resource).ok_or_else(|| SyncError::KindMismatch {
    key: key.canonical(),
    expected: T::kind(),
    found,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::CacheSource;
  use crate::model::{RecordItem, RecordPage};
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  fn record(id: &str) -> RecordItem {
    RecordItem {
      id: id.to_string(),
      collection: "widgets".to_string(),
      fields: Default::default(),
      created_at: None,
      updated_at: None,
    }
  }

  /// Loader that counts invocations and returns `ids` after `delay`.
  fn counting_loader(
    counter: &Arc<AtomicU32>,
    ids: &'static [&'static str],
    delay: Duration,
  ) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<RecordPage>> + Send + 'static {
    let counter = Arc::clone(counter);
    move || {
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        Ok(RecordPage::new(ids.iter().map(|id| record(id)).collect()))
      }
      .boxed()
    }
  }

  #[tokio::test]
  async fn test_miss_then_hit() {
    let coordinator = FetchCoordinator::new(CacheStore::new());
    let key = ResourceKey::full_listing("widgets");
    let calls = Arc::new(AtomicU32::new(0));

    let first = coordinator
      .resolve(key.clone(), counting_loader(&calls, &["a"], Duration::ZERO))
      .await
      .unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(first.data.len(), 1);

    let second = coordinator
      .resolve(key.clone(), counting_loader(&calls, &["b"], Duration::ZERO))
      .await
      .unwrap();
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert!(second.data.contains("a"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_concurrent_resolves_share_one_load() {
    let coordinator = FetchCoordinator::new(CacheStore::new());
    let key = ResourceKey::full_listing("widgets");
    let calls = Arc::new(AtomicU32::new(0));

    let (a, b) = tokio::join!(
      coordinator.resolve(
        key.clone(),
        counting_loader(&calls, &["a"], Duration::from_millis(20))
      ),
      coordinator.resolve(
        key.clone(),
        counting_loader(&calls, &["b"], Duration::from_millis(20))
      ),
    );

    assert_eq!(a.unwrap().data, b.unwrap().data);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_stale_value_served_and_refreshed_once() {
    let coordinator = FetchCoordinator::new(CacheStore::new());
    let key = ResourceKey::full_listing("widgets");
    let calls = Arc::new(AtomicU32::new(0));

    coordinator
      .resolve(key.clone(), counting_loader(&calls, &["a"], Duration::ZERO))
      .await
      .unwrap();
    coordinator.store().invalidate_listings("widgets");

    let stale = coordinator
      .resolve(key.clone(), counting_loader(&calls, &["b"], Duration::from_millis(10)))
      .await
      .unwrap();
    assert!(stale.is_stale());
    assert!(stale.data.contains("a"));

    // A second access while revalidating does not start another load.
    let again = coordinator
      .resolve(key.clone(), counting_loader(&calls, &["c"], Duration::ZERO))
      .await
      .unwrap();
    assert!(again.is_stale());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let fresh = coordinator
      .resolve(key, counting_loader(&calls, &["d"], Duration::ZERO))
      .await
      .unwrap();
    assert_eq!(fresh.source, CacheSource::CacheFresh);
    assert!(fresh.data.contains("b"));
  }

  #[tokio::test]
  async fn test_force_refresh_waits_for_new_value() {
    let coordinator = FetchCoordinator::new(CacheStore::new());
    let key = ResourceKey::full_listing("widgets");
    let calls = Arc::new(AtomicU32::new(0));

    coordinator
      .resolve(key.clone(), counting_loader(&calls, &["a"], Duration::ZERO))
      .await
      .unwrap();

    let page: RecordPage = coordinator
      .force_refresh(key.clone(), counting_loader(&calls, &["b"], Duration::from_millis(5)))
      .await
      .unwrap();
    assert!(page.contains("b"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(coordinator.store().get(&key).unwrap().is_fresh());
  }

  #[tokio::test]
  async fn test_loader_error_stored_and_propagated() {
    let coordinator = FetchCoordinator::new(CacheStore::new());
    let key = ResourceKey::record("widgets", "missing");

    let result = coordinator
      .resolve(key.clone(), || async {
        Err::<RecordItem, _>(SyncError::not_found("record widgets/missing"))
      })
      .await;
    assert!(result.unwrap_err().is_not_found());

    let entry = coordinator.store().get(&key).unwrap();
    assert_eq!(entry.freshness(), Freshness::Errored);
    assert!(entry.error().unwrap().is_not_found());

    // Errored entries are loaded again on the next access.
    let retried = coordinator
      .resolve(key, || async { Ok(record("missing")) })
      .await
      .unwrap();
    assert_eq!(retried.source, CacheSource::Network);
  }

  #[tokio::test]
  async fn test_kind_mismatch_reported() {
    let coordinator = FetchCoordinator::new(CacheStore::new());
    let key = ResourceKey::record("widgets", "a");
    coordinator
      .store()
      .put(key.clone(), RecordPage::default().into_resource());

    let result = coordinator
      .resolve(key, || async { Ok(record("a")) })
      .await;
    assert!(matches!(result, Err(SyncError::KindMismatch { .. })));
  }

  #[tokio::test]
  async fn test_invalidation_during_load_is_not_overwritten() {
    let coordinator = FetchCoordinator::new(CacheStore::new());
    let key = ResourceKey::full_listing("widgets");
    let calls = Arc::new(AtomicU32::new(0));

    let pending = coordinator.resolve::<RecordPage, _, _>(
      key.clone(),
      counting_loader(&calls, &["old"], Duration::from_millis(20)),
    );
    let invalidate = async {
      tokio::time::sleep(Duration::from_millis(5)).await;
      coordinator.store().invalidate_listings("widgets");
    };
    let (result, _) = tokio::join!(pending, invalidate);

    // The caller still gets its answer, but the cache does not treat it as fresh.
    assert!(result.unwrap().data.contains("old"));
    assert!(!coordinator.store().get(&key).unwrap().is_fresh());

    let next = coordinator
      .resolve(key, counting_loader(&calls, &["new"], Duration::ZERO))
      .await
      .unwrap();
    assert!(next.data.contains("new"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }
}

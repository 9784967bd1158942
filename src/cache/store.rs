//! In-memory cache store with freshness tracking and change subscriptions.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

use super::key::ResourceKey;
use super::lock::mutex_lock;
use super::traits::Resource;
use crate::error::{Result, SyncError};

/// A single load shared by every caller waiting on the same key.
pub(crate) type LoadFuture = Shared<BoxFuture<'static, Result<Resource>>>;

/// In-flight load registered on an entry.
#[derive(Clone)]
pub(crate) struct LoadHandle {
  pub(crate) id: u64,
  pub(crate) future: LoadFuture,
}

/// Freshness of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  /// Value may be returned without a network call
  Fresh,
  /// Value is kept for display but must be refetched on next access
  Stale,
  /// A load is in flight; any previous value is retained
  Loading,
  /// The last load failed
  Errored,
}

/// Snapshot of one cached key.
#[derive(Clone)]
pub struct CacheEntry {
  value: Option<Resource>,
  freshness: Freshness,
  resolved_at: Option<DateTime<Utc>>,
  error: Option<SyncError>,
  in_flight: Option<LoadHandle>,
}

impl CacheEntry {
  fn empty() -> Self {
    Self {
      value: None,
      freshness: Freshness::Stale,
      resolved_at: None,
      error: None,
      in_flight: None,
    }
  }

  fn settle_ok(&mut self, value: Resource) {
    self.value = Some(value);
    self.freshness = Freshness::Fresh;
    self.resolved_at = Some(Utc::now());
    self.error = None;
    self.in_flight = None;
  }

  fn settle_err(&mut self, err: SyncError) {
    self.freshness = Freshness::Errored;
    self.error = Some(err);
    self.in_flight = None;
  }

  /// Last resolved value, kept through invalidation and errors.
  pub fn value(&self) -> Option<&Resource> {
    self.value.as_ref()
  }

  pub fn freshness(&self) -> Freshness {
    self.freshness
  }

  pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
    self.resolved_at
  }

  pub fn error(&self) -> Option<&SyncError> {
    self.error.as_ref()
  }

  pub fn is_fresh(&self) -> bool {
    self.freshness == Freshness::Fresh
  }

  pub fn is_loading(&self) -> bool {
    self.in_flight.is_some()
  }
}

impl fmt::Debug for CacheEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEntry")
      .field("value", &self.value)
      .field("freshness", &self.freshness)
      .field("resolved_at", &self.resolved_at)
      .field("error", &self.error)
      .field("in_flight", &self.in_flight.as_ref().map(|h| h.id))
      .finish()
  }
}

/// Change notification delivered to subscribers of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
  /// A new value was stored
  Updated,
  /// The entry was marked stale
  Invalidated,
  /// A load for the entry failed
  Errored,
}

type Callback = Arc<dyn Fn(&ResourceKey, CacheEvent) + Send + Sync>;

#[derive(Default)]
struct Inner {
  entries: HashMap<ResourceKey, CacheEntry>,
  subscribers: HashMap<ResourceKey, Vec<(u64, Callback)>>,
}

impl Inner {
  fn callbacks_for(&self, key: &ResourceKey) -> Vec<Callback> {
    self
      .subscribers
      .get(key)
      .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
      .unwrap_or_default()
  }
}

/// Process-wide cache of resolved resources.
///
/// Cloning shares the same underlying store. Entries are never evicted;
/// they only change state through loads and invalidation.
#[derive(Clone, Default)]
pub struct CacheStore {
  inner: Arc<Mutex<Inner>>,
  next_id: Arc<AtomicU64>,
}

impl CacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Read-only lookup.
  pub fn get(&self, key: &ResourceKey) -> Option<CacheEntry> {
    mutex_lock(&self.inner, "cache.store", "get")
      .entries
      .get(key)
      .cloned()
  }

  /// Store a freshly resolved value.
  pub fn put(&self, key: ResourceKey, value: Resource) {
    let callbacks = {
      let mut inner = mutex_lock(&self.inner, "cache.store", "put");
      inner
        .entries
        .entry(key.clone())
        .or_insert_with(CacheEntry::empty)
        .settle_ok(value);
      inner.callbacks_for(&key)
    };

    debug!(key = %key, "cache put");
    notify(&callbacks, &key, CacheEvent::Updated);
  }

  /// Register an in-flight load for `key`.
  ///
  /// If a load is already in flight, the existing handle is returned and
  /// `handle` is discarded; the boolean tells whether `handle` was installed.
  pub(crate) fn mark_loading(&self, key: ResourceKey, handle: LoadHandle) -> (LoadHandle, bool) {
    let mut inner = mutex_lock(&self.inner, "cache.store", "mark_loading");
    let entry = inner.entries.entry(key).or_insert_with(CacheEntry::empty);

    if let Some(existing) = &entry.in_flight {
      return (existing.clone(), false);
    }

    entry.freshness = Freshness::Loading;
    entry.in_flight = Some(handle.clone());
    (handle, true)
  }

  /// Mark every entry whose key matches `predicate` as stale.
  ///
  /// Values are kept so views can keep rendering them. In-flight loads on
  /// matching keys are detached: their results still reach the callers
  /// awaiting them but are never written back, because they may predate the
  /// change that caused the invalidation.
  ///
  /// Returns the number of entries marked.
  pub fn invalidate<P>(&self, predicate: P) -> usize
  where
    P: Fn(&ResourceKey) -> bool,
  {
    let notifications: Vec<(ResourceKey, Vec<Callback>)> = {
      let mut inner = mutex_lock(&self.inner, "cache.store", "invalidate");
      let mut marked = Vec::new();

      for (key, entry) in inner.entries.iter_mut() {
        if !predicate(key) {
          continue;
        }
        entry.freshness = Freshness::Stale;
        entry.in_flight = None;
        marked.push(key.clone());
      }

      marked
        .into_iter()
        .map(|key| {
          let callbacks = inner.callbacks_for(&key);
          (key, callbacks)
        })
        .collect()
    };

    for (key, callbacks) in &notifications {
      debug!(key = %key, "cache invalidate");
      notify(callbacks, key, CacheEvent::Invalidated);
    }

    notifications.len()
  }

  /// Invalidate every listing of `slug`.
  pub fn invalidate_listings(&self, slug: &str) -> usize {
    self.invalidate(|key| key.is_listing_of(slug))
  }

  /// Invalidate one record and every listing of its collection.
  pub fn invalidate_record(&self, slug: &str, id: &str) -> usize {
    self.invalidate(|key| key.is_listing_of(slug) || key.is_record(slug, id))
  }

  /// Invalidate everything scoped to `slug`.
  pub fn invalidate_collection(&self, slug: &str) -> usize {
    self.invalidate(|key| key.belongs_to(slug))
  }

  /// Record a failed load. The last value is kept.
  pub fn error(&self, key: ResourceKey, err: SyncError) {
    let callbacks = {
      let mut inner = mutex_lock(&self.inner, "cache.store", "error");
      inner
        .entries
        .entry(key.clone())
        .or_insert_with(CacheEntry::empty)
        .settle_err(err);
      inner.callbacks_for(&key)
    };

    notify(&callbacks, &key, CacheEvent::Errored);
  }

  /// Apply the result of load `load_id`, unless it has been superseded.
  ///
  /// The ownership check and the write happen under one lock, so an
  /// invalidation can only land before (load discarded) or after (entry
  /// marked stale again), never in between.
  pub(crate) fn complete(&self, key: &ResourceKey, load_id: u64, result: &Result<Resource>) {
    let (event, callbacks) = {
      let mut inner = mutex_lock(&self.inner, "cache.store", "complete");
      let Some(entry) = inner
        .entries
        .get_mut(key)
        .filter(|e| e.in_flight.as_ref().map(|h| h.id) == Some(load_id))
      else {
        debug!(key = %key, load_id, "discarding superseded load");
        return;
      };

      let event = match result {
        Ok(value) => {
          entry.settle_ok(value.clone());
          CacheEvent::Updated
        }
        Err(err) => {
          warn!(key = %key, error = %err, "load failed");
          entry.settle_err(err.clone());
          CacheEvent::Errored
        }
      };
      (event, inner.callbacks_for(key))
    };

    debug!(key = %key, load_id, "load settled");
    notify(&callbacks, key, event);
  }

  pub(crate) fn next_load_id(&self) -> u64 {
    self.next_id.fetch_add(1, Ordering::Relaxed)
  }

  /// Subscribe to changes of `key`. Dropping the returned handle unsubscribes.
  pub fn subscribe<F>(&self, key: ResourceKey, callback: F) -> Subscription
  where
    F: Fn(&ResourceKey, CacheEvent) + Send + Sync + 'static,
  {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    mutex_lock(&self.inner, "cache.store", "subscribe")
      .subscribers
      .entry(key.clone())
      .or_default()
      .push((id, Arc::new(callback)));

    Subscription {
      store: Arc::downgrade(&self.inner),
      key,
      id,
    }
  }

  pub fn subscriber_count(&self, key: &ResourceKey) -> usize {
    mutex_lock(&self.inner, "cache.store", "subscriber_count")
      .subscribers
      .get(key)
      .map_or(0, Vec::len)
  }

  pub fn len(&self) -> usize {
    mutex_lock(&self.inner, "cache.store", "len").entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn keys(&self) -> Vec<ResourceKey> {
    mutex_lock(&self.inner, "cache.store", "keys")
      .entries
      .keys()
      .cloned()
      .collect()
  }
}

fn notify(callbacks: &[Callback], key: &ResourceKey, event: CacheEvent) {
  for callback in callbacks {
    callback(key, event);
  }
}

/// Active subscription on a cache key.
pub struct Subscription {
  store: Weak<Mutex<Inner>>,
  key: ResourceKey,
  id: u64,
}

impl Subscription {
  pub fn key(&self) -> &ResourceKey {
    &self.key
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    let Some(inner) = self.store.upgrade() else {
      return;
    };
    let mut inner = mutex_lock(&inner, "cache.store", "unsubscribe");
    if let Some(subs) = inner.subscribers.get_mut(&self.key) {
      subs.retain(|(id, _)| *id != self.id);
      if subs.is_empty() {
        inner.subscribers.remove(&self.key);
      }
    }
  }
}

//! Reactive query views over the cache.
//!
//! Inspired by TanStack Query, a `Query<T>` binds one `ResourceKey` to a
//! renderable state and keeps it current by subscribing to cache changes.
//!
//! # Example
//!
//! ```ignore
//! let mut listing = client.use_listing("orders", ListParams::new().limit(20));
//!
//! // In event loop tick
//! if listing.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match listing.state().status {
//!     QueryStatus::Loading => render_spinner(),
//!     QueryStatus::Loaded => render_rows(listing.data()),
//!     QueryStatus::Empty => render_placeholder(),
//!     QueryStatus::NotFound => render_not_found(),
//!     QueryStatus::Errored => render_error(listing.error()),
//! }
//! ```

use tokio::sync::mpsc;
use tracing::debug;

use crate::cache::{
  CacheEvent, CacheResult, Cacheable, Freshness, ListParams, ResourceKey, Subscription,
};
use crate::client::SyncClient;
use crate::error::{Result, SyncError};
use crate::model::RecordPage;

/// Renderable status of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// No data yet for the current key
  Loading,
  /// Data present
  Loaded,
  /// Loaded, but there is nothing to show
  Empty,
  /// The entity does not exist
  NotFound,
  /// The last load failed
  Errored,
}

/// What a view renders: `{status, data, error}` plus a staleness flag.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
  pub status: QueryStatus,
  pub data: Option<T>,
  pub error: Option<SyncError>,
  /// Data is from a stale entry and a refresh is underway
  pub stale: bool,
}

impl<T> QueryState<T> {
  fn loading() -> Self {
    Self {
      status: QueryStatus::Loading,
      data: None,
      error: None,
      stale: false,
    }
  }

  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  pub fn is_settled(&self) -> bool {
    !self.is_loading() && !self.stale
  }
}

impl<T: Cacheable> QueryState<T> {
  fn with_data(data: T, stale: bool) -> Self {
    Self {
      status: if data.is_empty_value() {
        QueryStatus::Empty
      } else {
        QueryStatus::Loaded
      },
      data: Some(data),
      error: None,
      stale,
    }
  }
}

enum Message<T> {
  Resolved {
    key: ResourceKey,
    result: Result<CacheResult<T>>,
  },
  Changed {
    key: ResourceKey,
    event: CacheEvent,
  },
}

/// View of one resource key.
///
/// Results and notifications are delivered through a channel and applied by
/// `poll` or `next`, so the state only changes on the owner's schedule.
/// Anything tagged with a key other than the current one is ignored.
pub struct Query<T: Cacheable> {
  client: SyncClient,
  key: ResourceKey,
  state: QueryState<T>,
  tx: mpsc::UnboundedSender<Message<T>>,
  rx: mpsc::UnboundedReceiver<Message<T>>,
  subscription: Subscription,
}

impl<T: Cacheable> Query<T> {
  pub(crate) fn new(client: SyncClient, key: ResourceKey) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = subscribe(&client, &key, &tx);

    let mut query = Self {
      client,
      key,
      state: QueryState::loading(),
      tx,
      rx,
      subscription,
    };
    query.fetch();
    query
  }

  pub fn key(&self) -> &ResourceKey {
    &self.key
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data.as_ref()
  }

  pub fn error(&self) -> Option<&SyncError> {
    self.state.error.as_ref()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  /// Resolve the current key through the cache.
  pub fn fetch(&mut self) {
    let client = self.client.clone();
    let key = self.key.clone();
    let tx = self.tx.clone();

    tokio::spawn(async move {
      let result = client.resolve::<T>(key.clone()).await;
      // Ignore send errors - the query may have been dropped
      let _ = tx.send(Message::Resolved { key, result });
    });
  }

  /// Reload the current key, skipping any fresh or stale value.
  pub fn refetch(&mut self) {
    let client = self.client.clone();
    let key = self.key.clone();
    let tx = self.tx.clone();

    tokio::spawn(async move {
      let result = client
        .refresh::<T>(key.clone())
        .await
        .map(|data| CacheResult::from_network(data, None));
      let _ = tx.send(Message::Resolved { key, result });
    });
  }

  /// Point the query at another key.
  ///
  /// Returns false if `key` equals the current key; otherwise the state
  /// resets to loading and the new key is resolved.
  pub fn set_key(&mut self, key: ResourceKey) -> bool {
    if key == self.key {
      return false;
    }

    debug!(from = %self.key, to = %key, "query key changed");
    self.subscription = subscribe(&self.client, &key, &self.tx);
    self.key = key;
    self.state = QueryState::loading();
    self.fetch();
    true
  }

  /// Apply everything that has arrived, without blocking.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    while let Ok(message) = self.rx.try_recv() {
      changed |= self.apply(message);
    }
    changed
  }

  /// Wait for the next message and apply it.
  ///
  /// Returns whether the state changed.
  pub async fn next(&mut self) -> bool {
    match self.rx.recv().await {
      Some(message) => self.apply(message),
      None => false,
    }
  }

  /// Apply messages until the state is neither loading nor stale.
  pub async fn settled(&mut self) -> &QueryState<T> {
    self.poll();
    while !self.state.is_settled() {
      self.next().await;
    }
    &self.state
  }

  fn apply(&mut self, message: Message<T>) -> bool {
    match message {
      Message::Resolved { key, .. } | Message::Changed { key, .. } if key != self.key => false,
      Message::Resolved { result, .. } => {
        match result {
          Ok(resolved) if resolved.is_stale() => self.apply_stale(resolved.data),
          Ok(resolved) => self.state = QueryState::with_data(resolved.data, false),
          Err(err) => self.fail(err),
        }
        true
      }
      Message::Changed { event, .. } => match event {
        CacheEvent::Updated => match self.cached_fresh() {
          Some(data) => {
            self.state = QueryState::with_data(data, false);
            true
          }
          None => false,
        },
        CacheEvent::Invalidated => {
          if self.state.data.is_some() {
            self.state.stale = true;
          }
          self.fetch();
          true
        }
        CacheEvent::Errored => {
          let err = self
            .client
            .store()
            .get(&self.key)
            .and_then(|entry| entry.error().cloned());
          match err {
            Some(err) => {
              self.fail(err);
              true
            }
            None => false,
          }
        }
      },
    }
  }

  /// A stale value arrived. The refresh behind it may already have settled,
  /// and its event may have been applied before this message.
  fn apply_stale(&mut self, data: T) {
    let Some(entry) = self.client.store().get(&self.key) else {
      self.state = QueryState::with_data(data, true);
      self.fetch();
      return;
    };

    match entry.freshness() {
      Freshness::Fresh => {
        let fresh = entry.value().cloned().and_then(T::from_resource);
        self.state = QueryState::with_data(fresh.unwrap_or(data), false);
      }
      Freshness::Errored => {
        self.state = QueryState::with_data(data, false);
        if let Some(err) = entry.error().cloned() {
          self.fail(err);
        }
      }
      Freshness::Loading => self.state = QueryState::with_data(data, true),
      Freshness::Stale => {
        // Nothing in flight: the refresh was detached. Start another.
        self.state = QueryState::with_data(data, true);
        self.fetch();
      }
    }
  }

  fn fail(&mut self, err: SyncError) {
    self.state.stale = false;
    if err.is_not_found() {
      self.state.status = QueryStatus::NotFound;
      self.state.data = None;
    } else {
      // Keep the last data around; the error is what gets rendered.
      self.state.status = QueryStatus::Errored;
    }
    self.state.error = Some(err);
  }

  fn cached_fresh(&self) -> Option<T> {
    let entry = self.client.store().get(&self.key)?;
    if !entry.is_fresh() {
      return None;
    }
    T::from_resource(entry.value()?.clone())
  }
}

impl Query<RecordPage> {
  /// Change the listing query. Only refetches if the canonical key changes.
  pub fn set_params(&mut self, params: ListParams) -> bool {
    let Some(collection) = self.key.collection() else {
      return false;
    };
    let key = ResourceKey::listing(collection, params);
    self.set_key(key)
  }
}

fn subscribe<T: Cacheable>(
  client: &SyncClient,
  key: &ResourceKey,
  tx: &mpsc::UnboundedSender<Message<T>>,
) -> Subscription {
  let tx = tx.clone();
  client.store().subscribe(key.clone(), move |key, event| {
    let _ = tx.send(Message::Changed {
      key: key.clone(),
      event,
    });
  })
}

impl<T: Cacheable + std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("state", &self.state)
      .finish_non_exhaustive()
  }
}

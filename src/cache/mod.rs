//! Resource cache: keys, storage and fetch coordination.
//!
//! This module provides an in-memory, consistency-first cache that:
//! - Identifies listings and records with canonical `ResourceKey`s
//! - Serves stale values while a single background load refreshes them
//! - De-duplicates concurrent loads of the same key
//! - Notifies subscribers on every update, invalidation and failure

mod key;
mod layer;
mod lock;
mod store;
mod traits;

pub use key::{ListParams, ResourceKey};
pub use layer::FetchCoordinator;
pub(crate) use lock::mutex_lock;
pub use store::{CacheEntry, CacheEvent, CacheStore, Freshness, Subscription};
pub use traits::{CacheResult, CacheSource, Cacheable, Resource};

//! Client-side synchronization for collection/record APIs.
//!
//! Reads go through a keyed cache with single-flight loading and
//! stale-while-revalidate; writes go through a mutation executor that
//! invalidates every affected key before reporting success. Views hold a
//! [`Query`] and re-render when the cache tells them their key changed.

pub mod backend;
pub mod cache;
pub mod client;
pub mod error;
pub mod guard;
pub mod model;
pub mod mutation;
pub mod query;

pub use backend::{HttpBackend, Loader, MemoryBackend, MutationBackend};
pub use cache::{CacheResult, CacheSource, CacheStore, ListParams, ResourceKey};
pub use client::SyncClient;
pub use error::{Result, SyncError};
pub use guard::{DeletionGuard, EntityRef};
pub use model::{Collection, CollectionChanges, Fields, NewCollection, RecordItem, RecordPage};
pub use mutation::{Mutation, MutationKind, MutationOutput, MutationRequest};
pub use query::{Query, QueryState, QueryStatus};

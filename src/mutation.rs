//! Write path: runs mutations against the backend and invalidates what they touch.

use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::backend::MutationBackend;
use crate::cache::{mutex_lock, CacheStore, ResourceKey};
use crate::error::{Result, SyncError};
use crate::guard::{DeletionGuard, EntityRef};
use crate::model::{Collection, CollectionChanges, Fields, NewCollection, RecordItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
  Create,
  Replace,
  Patch,
  Delete,
}

/// One write against the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
  CreateRecord {
    collection: String,
    fields: Fields,
  },
  ReplaceRecord {
    collection: String,
    id: String,
    fields: Fields,
  },
  PatchRecord {
    collection: String,
    id: String,
    fields: Fields,
  },
  DeleteRecord {
    collection: String,
    id: String,
  },
  CreateCollection(NewCollection),
  UpdateCollection {
    slug: String,
    changes: CollectionChanges,
  },
  DeleteCollection {
    slug: String,
  },
}

impl Mutation {
  pub fn kind(&self) -> MutationKind {
    match self {
      Self::CreateRecord { .. } | Self::CreateCollection(_) => MutationKind::Create,
      Self::ReplaceRecord { .. } => MutationKind::Replace,
      Self::PatchRecord { .. } | Self::UpdateCollection { .. } => MutationKind::Patch,
      Self::DeleteRecord { .. } | Self::DeleteCollection { .. } => MutationKind::Delete,
    }
  }

  /// Entity whose delete must not overlap with another delete of it.
  fn guarded_entity(&self) -> Option<EntityRef> {
    match self {
      Self::DeleteRecord { collection, id } => Some(EntityRef::record(collection, id)),
      Self::DeleteCollection { slug } => Some(EntityRef::collection(slug)),
      _ => None,
    }
  }

  /// Whether a successful run of this mutation makes `key` stale.
  ///
  /// - record create: listings of the collection
  /// - record replace/patch/delete: that record and listings of the collection
  /// - collection create: the collection index
  /// - collection update/delete: the index and everything under the slug
  ///   (and under the new slug when renamed)
  pub fn affects(&self, key: &ResourceKey) -> bool {
    match self {
      Self::CreateRecord { collection, .. } => key.is_listing_of(collection),
      Self::ReplaceRecord { collection, id, .. }
      | Self::PatchRecord { collection, id, .. }
      | Self::DeleteRecord { collection, id } => {
        key.is_listing_of(collection) || key.is_record(collection, id)
      }
      Self::CreateCollection(_) => *key == ResourceKey::Collections,
      Self::UpdateCollection { slug, changes } => {
        *key == ResourceKey::Collections
          || key.belongs_to(slug)
          || changes.slug.as_deref().is_some_and(|s| key.belongs_to(s))
      }
      Self::DeleteCollection { slug } => *key == ResourceKey::Collections || key.belongs_to(slug),
    }
  }

  pub fn describe(&self) -> String {
    match self {
      Self::CreateRecord { collection, .. } => format!("create record in {}", collection),
      Self::ReplaceRecord { collection, id, .. } => format!("replace record {}/{}", collection, id),
      Self::PatchRecord { collection, id, .. } => format!("patch record {}/{}", collection, id),
      Self::DeleteRecord { collection, id } => format!("delete record {}/{}", collection, id),
      Self::CreateCollection(new) => format!("create collection {}", new.slug),
      Self::UpdateCollection { slug, .. } => format!("update collection {}", slug),
      Self::DeleteCollection { slug } => format!("delete collection {}", slug),
    }
  }
}

/// What a successful mutation returned.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutput {
  Record(RecordItem),
  Collection(Collection),
  Deleted,
}

impl MutationOutput {
  pub fn record(&self) -> Option<&RecordItem> {
    match self {
      Self::Record(record) => Some(record),
      _ => None,
    }
  }
}

/// Executes mutations and keeps the cache coherent with their effects.
#[derive(Clone)]
pub struct MutationExecutor {
  backend: Arc<dyn MutationBackend>,
  store: CacheStore,
  guard: DeletionGuard,
}

impl MutationExecutor {
  pub fn new(backend: Arc<dyn MutationBackend>, store: CacheStore, guard: DeletionGuard) -> Self {
    Self {
      backend,
      store,
      guard,
    }
  }

  /// Run `mutation`.
  ///
  /// On success, affected keys are invalidated before this returns. On
  /// failure the cache is left exactly as it was. A delete of an entity that
  /// is already being deleted fails with `DeleteInProgress` without reaching
  /// the backend; the guard is released whichever way the delete settles.
  pub async fn execute(&self, mutation: Mutation) -> Result<MutationOutput> {
    let _ticket = match mutation.guarded_entity() {
      Some(entity) => Some(self.guard.begin(entity)?),
      None => None,
    };

    match self.dispatch(&mutation).await {
      Ok(output) => {
        let invalidated = self.store.invalidate(|key| mutation.affects(key));
        info!(
          mutation = %mutation.describe(),
          invalidated,
          "mutation succeeded"
        );
        Ok(output)
      }
      Err(err) => {
        warn!(mutation = %mutation.describe(), error = %err, "mutation failed");
        Err(err)
      }
    }
  }

  async fn dispatch(&self, mutation: &Mutation) -> Result<MutationOutput> {
    let backend = &self.backend;
    match mutation {
      Mutation::CreateRecord { collection, fields } => backend
        .create_record(collection, fields)
        .await
        .map(MutationOutput::Record),
      Mutation::ReplaceRecord {
        collection,
        id,
        fields,
      } => backend
        .replace_record(collection, id, fields)
        .await
        .map(MutationOutput::Record),
      Mutation::PatchRecord {
        collection,
        id,
        fields,
      } => backend
        .patch_record(collection, id, fields)
        .await
        .map(MutationOutput::Record),
      Mutation::DeleteRecord { collection, id } => backend
        .delete_record(collection, id)
        .await
        .map(|_| MutationOutput::Deleted),
      Mutation::CreateCollection(new) => backend
        .create_collection(new)
        .await
        .map(MutationOutput::Collection),
      Mutation::UpdateCollection { slug, changes } => backend
        .update_collection(slug, changes)
        .await
        .map(MutationOutput::Collection),
      Mutation::DeleteCollection { slug } => backend
        .delete_collection(slug)
        .await
        .map(|_| MutationOutput::Deleted),
    }
  }
}

/// Input of a record mutation handle. `id` is required for all kinds but create.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationRequest {
  pub id: Option<String>,
  pub fields: Fields,
}

impl MutationRequest {
  pub fn new(fields: Fields) -> Self {
    Self { id: None, fields }
  }

  pub fn for_record(id: impl Into<String>, fields: Fields) -> Self {
    Self {
      id: Some(id.into()),
      fields,
    }
  }

  pub fn delete(id: impl Into<String>) -> Self {
    Self::for_record(id, Fields::new())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationStatus {
  Pending,
  Succeeded(MutationOutput),
  Failed(SyncError),
}

/// A mutation plus its outcome, kept so the UI can read pending/error state.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationTask {
  pub mutation: Mutation,
  pub status: MutationStatus,
}

#[derive(Default)]
struct HandleState {
  pending: usize,
  last: Option<MutationTask>,
}

/// Counts one call as pending until it settles or its future is dropped.
struct PendingCall {
  state: Arc<Mutex<HandleState>>,
}

impl PendingCall {
  fn start(state: &Arc<Mutex<HandleState>>, mutation: Mutation) -> Self {
    let mut guard = mutex_lock(state, "mutation.handle", "call");
    guard.pending += 1;
    guard.last = Some(MutationTask {
      mutation,
      status: MutationStatus::Pending,
    });
    drop(guard);

    Self {
      state: Arc::clone(state),
    }
  }

  fn finish(self, task: MutationTask) {
    mutex_lock(&self.state, "mutation.handle", "settle").last = Some(task);
  }
}

impl Drop for PendingCall {
  fn drop(&mut self) {
    let mut state = mutex_lock(&self.state, "mutation.handle", "settle");
    state.pending = state.pending.saturating_sub(1);
  }
}

/// Callable record mutation of one kind, scoped to one collection.
#[derive(Clone)]
pub struct MutationHandle {
  executor: MutationExecutor,
  kind: MutationKind,
  collection: String,
  state: Arc<Mutex<HandleState>>,
}

impl MutationHandle {
  pub(crate) fn new(executor: MutationExecutor, kind: MutationKind, collection: String) -> Self {
    Self {
      executor,
      kind,
      collection,
      state: Arc::default(),
    }
  }

  pub fn kind(&self) -> MutationKind {
    self.kind
  }

  pub fn collection(&self) -> &str {
    &self.collection
  }

  /// Whether any call on this handle has not settled yet.
  pub fn is_pending(&self) -> bool {
    mutex_lock(&self.state, "mutation.handle", "is_pending").pending > 0
  }

  /// Error of the most recently settled call, if it failed.
  pub fn error(&self) -> Option<SyncError> {
    match &mutex_lock(&self.state, "mutation.handle", "error").last {
      Some(MutationTask {
        status: MutationStatus::Failed(err),
        ..
      }) => Some(err.clone()),
      _ => None,
    }
  }

  pub fn last_task(&self) -> Option<MutationTask> {
    mutex_lock(&self.state, "mutation.handle", "last_task")
      .last
      .clone()
  }

  pub async fn call(&self, request: MutationRequest) -> Result<MutationOutput> {
    let mutation = self.build(request)?;

    let pending = PendingCall::start(&self.state, mutation.clone());
    let result = self.executor.execute(mutation.clone()).await;
    pending.finish(MutationTask {
      mutation,
      status: match &result {
        Ok(output) => MutationStatus::Succeeded(output.clone()),
        Err(err) => MutationStatus::Failed(err.clone()),
      },
    });

    result
  }

  fn build(&self, request: MutationRequest) -> Result<Mutation> {
    let collection = self.collection.clone();
    let MutationRequest { id, fields } = request;

    let require_id = |id: Option<String>| {
      id.ok_or_else(|| {
        SyncError::InvalidRequest(format!(
          "{:?} on {} needs a record id",
          self.kind, self.collection
        ))
      })
    };

    Ok(match self.kind {
      MutationKind::Create => Mutation::CreateRecord { collection, fields },
      MutationKind::Replace => Mutation::ReplaceRecord {
        collection,
        id: require_id(id)?,
        fields,
      },
      MutationKind::Patch => Mutation::PatchRecord {
        collection,
        id: require_id(id)?,
        fields,
      },
      MutationKind::Delete => Mutation::DeleteRecord {
        collection,
        id: require_id(id)?,
      },
    })
  }
}

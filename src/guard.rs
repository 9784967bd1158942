//! Deletion guard: at most one pending delete per entity.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::cache::mutex_lock;
use crate::error::{Result, SyncError};

/// Qualified identity of a deletable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
  /// A record; ids are only unique within their collection
  Record { collection: String, id: String },
  /// A whole collection
  Collection(String),
}

impl EntityRef {
  pub fn record(collection: impl Into<String>, id: impl Into<String>) -> Self {
    Self::Record {
      collection: collection.into(),
      id: id.into(),
    }
  }

  pub fn collection(slug: impl Into<String>) -> Self {
    Self::Collection(slug.into())
  }
}

impl fmt::Display for EntityRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Record { collection, id } => write!(f, "record {}/{}", collection, id),
      Self::Collection(slug) => write!(f, "collection {}", slug),
    }
  }
}

/// Set of entities with a delete in flight.
///
/// Readable by anyone; only the mutation executor starts deletes.
#[derive(Clone, Default)]
pub struct DeletionGuard {
  deleting: Arc<Mutex<HashSet<EntityRef>>>,
}

impl DeletionGuard {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_deleting(&self, entity: &EntityRef) -> bool {
    mutex_lock(&self.deleting, "guard", "is_deleting").contains(entity)
  }

  pub fn in_progress(&self) -> Vec<EntityRef> {
    mutex_lock(&self.deleting, "guard", "in_progress")
      .iter()
      .cloned()
      .collect()
  }

  /// Move `entity` from idle to deleting.
  ///
  /// Fails with `DeleteInProgress` if it is already deleting. The returned
  /// ticket moves it back to idle when dropped, however the delete settles.
  pub(crate) fn begin(&self, entity: EntityRef) -> Result<DeletionTicket> {
    let mut deleting = mutex_lock(&self.deleting, "guard", "begin");
    if !deleting.insert(entity.clone()) {
      return Err(SyncError::DeleteInProgress(entity.to_string()));
    }

    Ok(DeletionTicket {
      guard: self.clone(),
      entity,
    })
  }
}

/// Held for the duration of one delete.
pub(crate) struct DeletionTicket {
  guard: DeletionGuard,
  entity: EntityRef,
}

impl Drop for DeletionTicket {
  fn drop(&mut self) {
    mutex_lock(&self.guard.deleting, "guard", "release").remove(&self.entity);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_second_begin_rejected_until_release() {
    let guard = DeletionGuard::new();
    let r1 = EntityRef::record("orders", "r1");

    let ticket = guard.begin(r1.clone()).unwrap();
    assert!(guard.is_deleting(&r1));
    assert!(matches!(
      guard.begin(r1.clone()),
      Err(SyncError::DeleteInProgress(_))
    ));

    drop(ticket);
    assert!(!guard.is_deleting(&r1));
    assert!(guard.begin(r1).is_ok());
  }

  #[test]
  fn test_independent_records_do_not_block() {
    let guard = DeletionGuard::new();
    let _r1 = guard.begin(EntityRef::record("orders", "r1")).unwrap();
    let _r2 = guard.begin(EntityRef::record("orders", "r2")).unwrap();
    assert_eq!(guard.in_progress().len(), 2);
  }

  #[test]
  fn test_same_id_in_other_collection_is_distinct() {
    let guard = DeletionGuard::new();
    let _orders = guard.begin(EntityRef::record("orders", "1")).unwrap();
    assert!(guard.begin(EntityRef::record("invoices", "1")).is_ok());
    assert!(!guard.is_deleting(&EntityRef::collection("orders")));
  }
}

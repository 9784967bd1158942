//! In-process backend with server-like semantics.
//!
//! Assigns record ids, enforces unique collection slugs and counts every call,
//! which makes it the backend of choice for tests and local experiments.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Loader, MutationBackend};
use crate::cache::{mutex_lock, ListParams};
use crate::error::{Result, SyncError};
use crate::model::{Collection, CollectionChanges, Fields, NewCollection, RecordItem, RecordPage};

/// Backend operations, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
  ListCollections,
  ListRecords,
  GetRecord,
  CreateRecord,
  ReplaceRecord,
  PatchRecord,
  DeleteRecord,
  CreateCollection,
  UpdateCollection,
  DeleteCollection,
}

#[derive(Default)]
struct State {
  collections: Vec<Collection>,
  /// Records per collection slug, in insertion order
  records: HashMap<String, Vec<RecordItem>>,
  next_id: u64,
  calls: HashMap<Operation, u32>,
  failures: HashMap<Operation, SyncError>,
}

impl State {
  fn next_id(&mut self, prefix: &str) -> String {
    self.next_id += 1;
    format!("{}{}", prefix, self.next_id)
  }

  fn records_mut(&mut self, collection: &str) -> Result<&mut Vec<RecordItem>> {
    self
      .records
      .get_mut(collection)
      .ok_or_else(|| SyncError::not_found(format!("collection {}", collection)))
  }

  fn record_mut(&mut self, collection: &str, id: &str) -> Result<&mut RecordItem> {
    self
      .records_mut(collection)?
      .iter_mut()
      .find(|r| r.id == id)
      .ok_or_else(|| SyncError::not_found(format!("record {}/{}", collection, id)))
  }
}

/// Shared in-memory backend. Clones operate on the same data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
  state: Arc<Mutex<State>>,
  latency: Option<Duration>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Delay every operation by `latency` before it takes effect.
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = Some(latency);
    self
  }

  /// Add a collection directly, bypassing call counting.
  pub fn insert_collection(&self, slug: &str, name: &str) -> Collection {
    let mut state = mutex_lock(&self.state, "backend.memory", "insert_collection");
    let collection = Collection {
      id: state.next_id("c"),
      name: name.to_string(),
      slug: slug.to_string(),
      description: None,
    };
    state.collections.push(collection.clone());
    state.records.entry(slug.to_string()).or_default();
    collection
  }

  /// Add a record with a chosen id directly, bypassing call counting.
  pub fn insert_record(&self, collection: &str, id: &str, fields: Fields) -> RecordItem {
    let mut state = mutex_lock(&self.state, "backend.memory", "insert_record");
    let now = Utc::now();
    let record = RecordItem {
      id: id.to_string(),
      collection: collection.to_string(),
      fields,
      created_at: Some(now),
      updated_at: Some(now),
    };
    state
      .records
      .entry(collection.to_string())
      .or_default()
      .push(record.clone());
    record
  }

  /// Number of times `op` has been called.
  pub fn calls(&self, op: Operation) -> u32 {
    mutex_lock(&self.state, "backend.memory", "calls")
      .calls
      .get(&op)
      .copied()
      .unwrap_or(0)
  }

  /// Make the next call of `op` fail with `err` without touching any data.
  pub fn fail_next(&self, op: Operation, err: SyncError) {
    mutex_lock(&self.state, "backend.memory", "fail_next")
      .failures
      .insert(op, err);
  }

  /// Count the call, wait out the latency, then apply any injected failure.
  async fn enter(&self, op: Operation) -> Result<()> {
    *mutex_lock(&self.state, "backend.memory", "enter")
      .calls
      .entry(op)
      .or_insert(0) += 1;

    if let Some(latency) = self.latency {
      tokio::time::sleep(latency).await;
    }

    match mutex_lock(&self.state, "backend.memory", "enter")
      .failures
      .remove(&op)
    {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }
}

fn require_fields(fields: &Fields) -> Result<()> {
  if fields.is_empty() {
    return Err(SyncError::Validation("record fields must not be empty".into()));
  }
  Ok(())
}

fn validate_slug(slug: &str) -> Result<()> {
  let valid = !slug.is_empty()
    && slug
      .chars()
      .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
  if !valid {
    return Err(SyncError::Validation(format!(
      "slug '{}' must be lowercase letters, digits or dashes",
      slug
    )));
  }
  Ok(())
}

/// Case-insensitive substring match over every field value.
fn matches_search(record: &RecordItem, q: &str) -> bool {
  let q = q.to_lowercase();
  record.fields.values().any(|value| match value {
    Value::String(s) => s.to_lowercase().contains(&q),
    other => other.to_string().to_lowercase().contains(&q),
  })
}

fn matches_filters(record: &RecordItem, params: &ListParams) -> bool {
  params
    .filters()
    .iter()
    .all(|(name, expected)| match record.fields.get(name) {
      Some(Value::String(s)) => s == expected,
      Some(other) => other.to_string() == *expected,
      None => false,
    })
}

#[async_trait]
impl Loader for MemoryBackend {
  async fn list_collections(&self) -> Result<Vec<Collection>> {
    self.enter(Operation::ListCollections).await?;
    Ok(mutex_lock(&self.state, "backend.memory", "list_collections").collections.clone())
  }

  async fn list_records(&self, collection: &str, params: &ListParams) -> Result<RecordPage> {
    self.enter(Operation::ListRecords).await?;
    let mut state = mutex_lock(&self.state, "backend.memory", "list_records");
    let records = state.records_mut(collection)?;

    let matched: Vec<&RecordItem> = records
      .iter()
      .filter(|r| params.get_search().map_or(true, |q| matches_search(r, q)))
      .filter(|r| matches_filters(r, params))
      .collect();

    let total = matched.len() as u64;
    let offset = params.get_offset().unwrap_or(0) as usize;
    let limit = params.get_limit().map_or(usize::MAX, |l| l as usize);

    Ok(RecordPage {
      records: matched
        .into_iter()
        .skip(offset)
        .take(limit)
        .cloned()
        .collect(),
      total: Some(total),
    })
  }

  async fn get_record(&self, collection: &str, id: &str) -> Result<RecordItem> {
    self.enter(Operation::GetRecord).await?;
    let mut state = mutex_lock(&self.state, "backend.memory", "get_record");
    let record = state.record_mut(collection, id)?;
    Ok(record.clone())
  }
}

#[async_trait]
impl MutationBackend for MemoryBackend {
  async fn create_record(&self, collection: &str, fields: &Fields) -> Result<RecordItem> {
    self.enter(Operation::CreateRecord).await?;
    require_fields(fields)?;

    let mut state = mutex_lock(&self.state, "backend.memory", "create_record");
    state.records_mut(collection)?;
    let now = Utc::now();
    let record = RecordItem {
      id: state.next_id("r"),
      collection: collection.to_string(),
      fields: fields.clone(),
      created_at: Some(now),
      updated_at: Some(now),
    };
    state.records_mut(collection)?.push(record.clone());
    Ok(record)
  }

  async fn replace_record(&self, collection: &str, id: &str, fields: &Fields) -> Result<RecordItem> {
    self.enter(Operation::ReplaceRecord).await?;
    require_fields(fields)?;

    let mut state = mutex_lock(&self.state, "backend.memory", "replace_record");
    let record = state.record_mut(collection, id)?;
    record.fields = fields.clone();
    record.updated_at = Some(Utc::now());
    Ok(record.clone())
  }

  async fn patch_record(&self, collection: &str, id: &str, fields: &Fields) -> Result<RecordItem> {
    self.enter(Operation::PatchRecord).await?;

    let mut state = mutex_lock(&self.state, "backend.memory", "patch_record");
    let record = state.record_mut(collection, id)?;
    for (name, value) in fields {
      record.fields.insert(name.clone(), value.clone());
    }
    record.updated_at = Some(Utc::now());
    Ok(record.clone())
  }

  async fn delete_record(&self, collection: &str, id: &str) -> Result<()> {
    self.enter(Operation::DeleteRecord).await?;

    let mut state = mutex_lock(&self.state, "backend.memory", "delete_record");
    let records = state.records_mut(collection)?;
    let before = records.len();
    records.retain(|r| r.id != id);
    if records.len() == before {
      return Err(SyncError::not_found(format!("record {}/{}", collection, id)));
    }
    Ok(())
  }

  async fn create_collection(&self, collection: &NewCollection) -> Result<Collection> {
    self.enter(Operation::CreateCollection).await?;
    validate_slug(&collection.slug)?;

    let mut state = mutex_lock(&self.state, "backend.memory", "create_collection");
    if state.collections.iter().any(|c| c.slug == collection.slug) {
      return Err(SyncError::Conflict(format!(
        "slug '{}' is already taken",
        collection.slug
      )));
    }

    let created = Collection {
      id: state.next_id("c"),
      name: collection.name.clone(),
      slug: collection.slug.clone(),
      description: collection.description.clone(),
    };
    state.collections.push(created.clone());
    state.records.entry(created.slug.clone()).or_default();
    Ok(created)
  }

  async fn update_collection(&self, slug: &str, changes: &CollectionChanges) -> Result<Collection> {
    self.enter(Operation::UpdateCollection).await?;
    if let Some(new_slug) = &changes.slug {
      validate_slug(new_slug)?;
    }

    let mut state = mutex_lock(&self.state, "backend.memory", "update_collection");
    if let Some(new_slug) = &changes.slug {
      if new_slug != slug && state.collections.iter().any(|c| &c.slug == new_slug) {
        return Err(SyncError::Conflict(format!(
          "slug '{}' is already taken",
          new_slug
        )));
      }
    }

    let collection = state
      .collections
      .iter_mut()
      .find(|c| c.slug == slug)
      .ok_or_else(|| SyncError::not_found(format!("collection {}", slug)))?;

    if let Some(name) = &changes.name {
      collection.name = name.clone();
    }
    if let Some(description) = &changes.description {
      collection.description = Some(description.clone());
    }
    let renamed = changes.slug.clone().filter(|s| s != slug);
    if let Some(new_slug) = &renamed {
      collection.slug = new_slug.clone();
    }
    let updated = collection.clone();

    if let Some(new_slug) = renamed {
      let mut records = state.records.remove(slug).unwrap_or_default();
      for record in &mut records {
        record.collection = new_slug.clone();
      }
      state.records.insert(new_slug, records);
    }

    Ok(updated)
  }

  async fn delete_collection(&self, slug: &str) -> Result<()> {
    self.enter(Operation::DeleteCollection).await?;

    let mut state = mutex_lock(&self.state, "backend.memory", "delete_collection");
    let before = state.collections.len();
    state.collections.retain(|c| c.slug != slug);
    if state.collections.len() == before {
      return Err(SyncError::not_found(format!("collection {}", slug)));
    }
    state.records.remove(slug);
    Ok(())
  }
}

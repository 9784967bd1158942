//! Domain types exchanged with the backend.
//!
//! Record payloads are opaque: this layer never interprets field values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form record payload.
pub type Fields = Map<String, Value>;

/// A named, slug-identified grouping of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
  pub id: String,
  pub name: String,
  pub slug: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

/// Payload for creating a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCollection {
  pub name: String,
  pub slug: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

/// Partial update of a collection. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionChanges {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub slug: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

/// A record owned by one collection.
///
/// `id` is only unique within `collection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordItem {
  pub id: String,
  #[serde(default)]
  pub collection: String,
  #[serde(default)]
  pub fields: Fields,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<DateTime<Utc>>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
  pub records: Vec<RecordItem>,
  /// Total matching records when the server reports it
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub total: Option<u64>,
}

impl RecordPage {
  pub fn new(records: Vec<RecordItem>) -> Self {
    Self {
      records,
      total: None,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn contains(&self, id: &str) -> bool {
    self.records.iter().any(|r| r.id == id)
  }
}

/// Convert a JSON value into record fields, rejecting non-objects.
pub fn fields_from_value(value: Value) -> Option<Fields> {
  match value {
    Value::Object(map) => Some(map),
    _ => None,
  }
}

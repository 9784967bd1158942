//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};

use crate::model::{Collection, RecordItem, RecordPage};

/// Every value the cache can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
  Collections(Vec<Collection>),
  Records(RecordPage),
  Record(RecordItem),
}

impl Resource {
  pub fn kind(&self) -> &'static str {
    match self {
      Resource::Collections(_) => Vec::<Collection>::kind(),
      Resource::Records(_) => RecordPage::kind(),
      Resource::Record(_) => RecordItem::kind(),
    }
  }
}

/// Trait for values that can be cached.
///
/// Maps a typed value into the closed `Resource` set and back.
pub trait Cacheable: Clone + Send + Sync + 'static {
  /// Value kind name for logs and mismatch errors (e.g., "record", "page")
  fn kind() -> &'static str;

  fn into_resource(self) -> Resource;

  /// Returns None if the resource holds a different kind.
  fn from_resource(resource: Resource) -> Option<Self>;

  /// Whether the value should render as "empty" rather than "loaded".
  fn is_empty_value(&self) -> bool {
    false
  }
}

impl Cacheable for Vec<Collection> {
  fn kind() -> &'static str {
    "collections"
  }

  fn into_resource(self) -> Resource {
    Resource::Collections(self)
  }

  fn from_resource(resource: Resource) -> Option<Self> {
    match resource {
      Resource::Collections(collections) => Some(collections),
      _ => None,
    }
  }

  fn is_empty_value(&self) -> bool {
    self.is_empty()
  }
}

impl Cacheable for RecordPage {
  fn kind() -> &'static str {
    "page"
  }

  fn into_resource(self) -> Resource {
    Resource::Records(self)
  }

  fn from_resource(resource: Resource) -> Option<Self> {
    match resource {
      Resource::Records(page) => Some(page),
      _ => None,
    }
  }

  fn is_empty_value(&self) -> bool {
    self.is_empty()
  }
}

impl Cacheable for RecordItem {
  fn kind() -> &'static str {
    "record"
  }

  fn into_resource(self) -> Resource {
    Resource::Record(self)
  }

  fn from_resource(resource: Resource) -> Option<Self> {
    match resource {
      Resource::Record(record) => Some(record),
      _ => None,
    }
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was last resolved from the network
  pub resolved_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T, resolved_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      resolved_at,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, resolved_at: Option<DateTime<Utc>>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      resolved_at,
    }
  }

  pub fn is_stale(&self) -> bool {
    self.source == CacheSource::CacheStale
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, stale; a background refresh is in progress
  CacheStale,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_round_trip_keeps_kind() {
    let page = RecordPage::default();
    let resource = page.clone().into_resource();
    assert_eq!(resource.kind(), "page");
    assert_eq!(RecordPage::from_resource(resource.clone()), Some(page));
    assert_eq!(RecordItem::from_resource(resource), None);
  }

  #[test]
  fn test_empty_page_is_empty_value() {
    assert!(RecordPage::default().is_empty_value());
    assert!(Vec::<Collection>::new().is_empty_value());
  }
}

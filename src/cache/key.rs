//! Canonical cache identities for listings and records.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, SyncError};

/// Canonical query parameters of a listing.
///
/// Fields are stored already normalized, so two parameter sets describing
/// the same query compare equal no matter how they were assembled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ListParams {
  limit: Option<u32>,
  offset: Option<u32>,
  q: Option<String>,
  filters: BTreeMap<String, String>,
}

impl ListParams {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn limit(mut self, limit: u32) -> Self {
    self.limit = Some(limit);
    self
  }

  /// Offset 0 is the same page as no offset.
  pub fn offset(mut self, offset: u32) -> Self {
    self.offset = (offset > 0).then_some(offset);
    self
  }

  /// Blank search terms mean "no search".
  pub fn search(mut self, q: impl AsRef<str>) -> Self {
    let q = q.as_ref().trim();
    self.q = (!q.is_empty()).then(|| q.to_string());
    self
  }

  /// Add an exact-match filter.
  ///
  /// `limit`, `offset` and `q` are not filters; passing one of them here
  /// fails with `InvalidRequest` so it cannot bypass normalization.
  pub fn filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
    let name = name.into();
    if RESERVED_PARAMS.contains(&name.as_str()) {
      return Err(SyncError::InvalidRequest(format!(
        "'{}' is a paging or search parameter, not a filter",
        name
      )));
    }
    self.filters.insert(name, value.into());
    Ok(self)
  }

  /// Build parameters from unordered `(name, value)` pairs.
  ///
  /// `None` values are dropped. `limit` and `offset` must be unsigned
  /// integers. A name given twice is rejected, since which one wins would
  /// depend on ordering.
  pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
  where
    I: IntoIterator<Item = (K, Option<V>)>,
    K: AsRef<str>,
    V: AsRef<str>,
  {
    let mut seen = std::collections::HashSet::new();
    let mut params = Self::new();

    for (name, value) in pairs {
      let name = name.as_ref();
      let Some(value) = value else { continue };
      let value = value.as_ref();

      if !seen.insert(name.to_string()) {
        return Err(SyncError::InvalidRequest(format!(
          "query parameter '{}' given more than once",
          name
        )));
      }

      params = match name {
        "limit" => params.limit(parse_u32(name, value)?),
        "offset" => params.offset(parse_u32(name, value)?),
        "q" => params.search(value),
        _ => params.filter(name, value)?,
      };
    }

    Ok(params)
  }

  pub fn get_limit(&self) -> Option<u32> {
    self.limit
  }

  pub fn get_offset(&self) -> Option<u32> {
    self.offset
  }

  pub fn get_search(&self) -> Option<&str> {
    self.q.as_deref()
  }

  pub fn filters(&self) -> &BTreeMap<String, String> {
    &self.filters
  }

  pub fn is_empty(&self) -> bool {
    self.limit.is_none() && self.offset.is_none() && self.q.is_none() && self.filters.is_empty()
  }

  /// Query pairs in canonical order, ready for a URL.
  pub fn to_query_pairs(&self) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if let Some(limit) = self.limit {
      pairs.push(("limit".to_string(), limit.to_string()));
    }
    if let Some(offset) = self.offset {
      pairs.push(("offset".to_string(), offset.to_string()));
    }
    if let Some(q) = &self.q {
      pairs.push(("q".to_string(), q.clone()));
    }
    for (name, value) in &self.filters {
      pairs.push((name.clone(), value.clone()));
    }
    pairs
  }
}

const RESERVED_PARAMS: [&str; 3] = ["limit", "offset", "q"];

fn parse_u32(name: &str, value: &str) -> Result<u32> {
  value.trim().parse().map_err(|_| {
    SyncError::InvalidRequest(format!(
      "query parameter '{}' must be a non-negative integer, got '{}'",
      name, value
    ))
  })
}

/// Identity of one cacheable unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
  /// The collection index
  Collections,
  /// Records of a collection under some (possibly empty) query
  Listing {
    collection: String,
    params: ListParams,
  },
  /// A single record, qualified by its collection
  Record { collection: String, id: String },
}

impl ResourceKey {
  pub fn collections() -> Self {
    Self::Collections
  }

  pub fn listing(collection: impl Into<String>, params: ListParams) -> Self {
    Self::Listing {
      collection: collection.into(),
      params,
    }
  }

  /// Unfiltered listing; identical to `listing(slug, ListParams::default())`.
  pub fn full_listing(collection: impl Into<String>) -> Self {
    Self::listing(collection, ListParams::default())
  }

  pub fn record(collection: impl Into<String>, id: impl Into<String>) -> Self {
    Self::Record {
      collection: collection.into(),
      id: id.into(),
    }
  }

  /// Owning collection slug, if the key is scoped to one.
  pub fn collection(&self) -> Option<&str> {
    match self {
      Self::Collections => None,
      Self::Listing { collection, .. } | Self::Record { collection, .. } => Some(collection),
    }
  }

  pub fn is_listing_of(&self, slug: &str) -> bool {
    matches!(self, Self::Listing { collection, .. } if collection == slug)
  }

  pub fn is_record(&self, slug: &str, record_id: &str) -> bool {
    matches!(self, Self::Record { collection, id } if collection == slug && id == record_id)
  }

  /// Any listing or record under `slug`.
  pub fn belongs_to(&self, slug: &str) -> bool {
    self.collection() == Some(slug)
  }

  /// Stable textual form, used for hashing and logs.
  pub fn canonical(&self) -> String {
    match self {
      Self::Collections => "collections".to_string(),
      Self::Listing { collection, params } => {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in params.to_query_pairs() {
          query.append_pair(&name, &value);
        }
        format!("listing:{}?{}", encode(collection), query.finish())
      }
      Self::Record { collection, id } => format!("record:{}/{}", encode(collection), encode(id)),
    }
  }

  /// SHA-256 of the canonical form, hex encoded.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.canonical().as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Human-readable description.
  pub fn describe(&self) -> String {
    match self {
      Self::Collections => "all collections".to_string(),
      Self::Listing { collection, params } if params.is_empty() => {
        format!("{} records", collection)
      }
      Self::Listing { collection, params } => {
        let parts: Vec<String> = params
          .to_query_pairs()
          .into_iter()
          .map(|(k, v)| format!("{}={}", k, v))
          .collect();
        format!("{} records ({})", collection, parts.join(", "))
      }
      Self::Record { collection, id } => format!("record {} in {}", id, collection),
    }
  }
}

fn encode(component: &str) -> String {
  url::form_urlencoded::byte_serialize(component.as_bytes()).collect()
}

impl fmt::Display for ResourceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.canonical())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_param_order_does_not_matter() {
    let a = ListParams::from_pairs([("limit", Some("10")), ("offset", Some("5"))]).unwrap();
    let b = ListParams::from_pairs([("offset", Some("5")), ("limit", Some("10"))]).unwrap();
    assert_eq!(a, b);
    assert_eq!(
      ResourceKey::listing("widgets", a).fingerprint(),
      ResourceKey::listing("widgets", b).fingerprint()
    );
  }

  #[test]
  fn test_builder_and_pairs_agree() {
    let built = ListParams::new().search("blue").limit(10).filter("color", "red").unwrap();
    let parsed = ListParams::from_pairs([
      ("color", Some("red")),
      ("q", Some("blue")),
      ("limit", Some("10")),
    ])
    .unwrap();
    assert_eq!(built, parsed);
  }

  #[test]
  fn test_absent_values_equal_no_params() {
    let none: [(&str, Option<&str>); 0] = [];
    let empty = ListParams::from_pairs(none).unwrap();
    let undefined = ListParams::from_pairs([("limit", None::<&str>), ("q", None)]).unwrap();
    assert_eq!(empty, undefined);
    assert_eq!(
      ResourceKey::listing("widgets", undefined),
      ResourceKey::full_listing("widgets")
    );
  }

  #[test]
  fn test_blank_search_and_zero_offset_normalize() {
    let params = ListParams::new().search("   ").offset(0);
    assert!(params.is_empty());

    let params = ListParams::new().search("  ada ");
    assert_eq!(params.get_search(), Some("ada"));
  }

  #[test]
  fn test_offset_zero_pair_matches_missing_offset() {
    let a = ListParams::from_pairs([("limit", Some("10")), ("offset", Some("0"))]).unwrap();
    let b = ListParams::from_pairs([("limit", Some("10"))]).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn test_duplicate_parameter_rejected() {
    let result = ListParams::from_pairs([("q", Some("a")), ("q", Some("b"))]);
    assert!(matches!(result, Err(SyncError::InvalidRequest(_))));
  }

  #[test]
  fn test_bad_limit_rejected() {
    let result = ListParams::from_pairs([("limit", Some("ten"))]);
    assert!(matches!(result, Err(SyncError::InvalidRequest(_))));
  }

  #[test]
  fn test_different_params_different_keys() {
    let page1 = ResourceKey::listing("widgets", ListParams::new().limit(10));
    let page2 = ResourceKey::listing("widgets", ListParams::new().limit(10).offset(10));
    assert_ne!(page1, page2);
    assert_ne!(page1.fingerprint(), page2.fingerprint());
  }

  #[test]
  fn test_record_identity_is_collection_qualified() {
    let a = ResourceKey::record("orders", "1");
    let b = ResourceKey::record("invoices", "1");
    assert_ne!(a, b);
    assert!(a.is_record("orders", "1"));
    assert!(!a.is_record("invoices", "1"));
  }

  #[test]
  fn test_scope_predicates() {
    let listing = ResourceKey::listing("orders", ListParams::new().search("x"));
    let record = ResourceKey::record("orders", "r1");
    assert!(listing.is_listing_of("orders"));
    assert!(!record.is_listing_of("orders"));
    assert!(listing.belongs_to("orders"));
    assert!(record.belongs_to("orders"));
    assert!(!ResourceKey::collections().belongs_to("orders"));
  }

  #[test]
  fn test_canonical_form() {
    let key = ResourceKey::listing("orders", ListParams::new().search("a b").limit(5));
    assert_eq!(key.canonical(), "listing:orders?limit=5&q=a+b");
    assert_eq!(ResourceKey::record("orders", "r1").to_string(), "record:orders/r1");
  }

  #[test]
  fn test_record_components_are_escaped() {
    let a = ResourceKey::record("a/b", "c");
    let b = ResourceKey::record("a", "b/c");
    assert_eq!(a.canonical(), "record:a%2Fb/c");
    assert_eq!(b.canonical(), "record:a/b%2Fc");
    assert_ne!(a.fingerprint(), b.fingerprint());

    let listing = ResourceKey::full_listing("x?limit=1");
    let paged = ResourceKey::listing("x", ListParams::new().limit(1));
    assert_ne!(listing.canonical(), paged.canonical());
  }

  #[test]
  fn test_reserved_names_are_not_filters() {
    for name in ["limit", "offset", "q"] {
      let result = ListParams::new().limit(5).filter(name, "10");
      assert!(matches!(result, Err(SyncError::InvalidRequest(_))), "{}", name);
    }

    // Through pairs they land on the typed fields, so keys stay comparable.
    let parsed = ListParams::from_pairs([("limit", Some("10")), ("status", Some("open"))]).unwrap();
    let built = ListParams::new().limit(10).filter("status", "open").unwrap();
    let key = ResourceKey::listing("widgets", parsed);
    assert_eq!(
      key,
      ResourceKey::listing("widgets", built)
    );
    assert_eq!(key.fingerprint().len(), 64);
  }

  #[test]
  fn test_describe() {
    assert_eq!(ResourceKey::full_listing("orders").describe(), "orders records");
    assert_eq!(
      ResourceKey::listing("orders", ListParams::new().limit(5)).describe(),
      "orders records (limit=5)"
    );
  }
}

//! REST backend over `reqwest`.
//!
//! Layout: `/collections`, `/collections/{slug}`, `/collections/{slug}/records`
//! and `/collections/{slug}/records/{id}` relative to the configured base URL.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{Loader, MutationBackend};
use crate::cache::ListParams;
use crate::error::{Result, SyncError};
use crate::model::{Collection, CollectionChanges, Fields, NewCollection, RecordItem, RecordPage};

// ============================================================================
// Response shapes
// ============================================================================

/// Listings may come back bare or wrapped with a total.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiRecordsResponse {
  Page {
    records: Vec<RecordItem>,
    #[serde(default)]
    total: Option<u64>,
  },
  Bare(Vec<RecordItem>),
}

impl ApiRecordsResponse {
  fn into_page(self, collection: &str) -> RecordPage {
    let (records, total) = match self {
      Self::Page { records, total } => (records, total),
      Self::Bare(records) => (records, None),
    };
    RecordPage {
      records: records
        .into_iter()
        .map(|r| adopt(r, collection))
        .collect(),
      total,
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiCollectionsResponse {
  Wrapped { collections: Vec<Collection> },
  Bare(Vec<Collection>),
}

/// Servers may omit the owning collection on nested routes.
fn adopt(mut record: RecordItem, collection: &str) -> RecordItem {
  if record.collection.is_empty() {
    record.collection = collection.to_string();
  }
  record
}

// ============================================================================
// Client
// ============================================================================

/// HTTP implementation of both backend capabilities.
#[derive(Clone)]
pub struct HttpBackend {
  client: reqwest::Client,
  base: Url,
}

impl HttpBackend {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
    let base = Url::parse(base_url)
      .map_err(|e| SyncError::InvalidRequest(format!("invalid API URL '{}': {}", base_url, e)))?;
    if base.cannot_be_a_base() {
      return Err(SyncError::InvalidRequest(format!(
        "API URL '{}' cannot be used as a base",
        base_url
      )));
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self { client, base })
  }

  /// Append path segments to the base URL, percent-encoding each one.
  fn endpoint(&self, segments: &[&str]) -> Result<Url> {
    let mut url = self.base.clone();
    url
      .path_segments_mut()
      .map_err(|_| SyncError::InvalidRequest(format!("API URL '{}' has no path", self.base)))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, resource: &str) -> Result<T> {
    let response = dispatch(request, resource).await?;
    response
      .json::<T>()
      .await
      .map_err(|e| SyncError::Network(format!("failed to parse {}: {}", resource, e)))
  }

  async fn send_empty(&self, request: RequestBuilder, resource: &str) -> Result<()> {
    dispatch(request, resource).await?;
    Ok(())
  }
}

async fn dispatch(request: RequestBuilder, resource: &str) -> Result<Response> {
  let response = request
    .send()
    .await
    .map_err(|e| SyncError::Network(format!("request for {} failed: {}", resource, e)))?;

  let status = response.status();
  debug!(resource, status = status.as_u16(), "http response");
  if status.is_success() {
    return Ok(response);
  }

  let body = response.text().await.unwrap_or_default();
  Err(error_for_status(status, body, resource))
}

/// Map a non-success status onto the error taxonomy.
fn error_for_status(status: StatusCode, body: String, resource: &str) -> SyncError {
  let message = if body.trim().is_empty() {
    status
      .canonical_reason()
      .unwrap_or("request rejected")
      .to_string()
  } else {
    body
  };

  match status {
    StatusCode::NOT_FOUND => SyncError::not_found(resource),
    StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => SyncError::Validation(message),
    StatusCode::CONFLICT => SyncError::Conflict(message),
    _ => SyncError::Network(format!("{} returned {}: {}", resource, status, message)),
  }
}

#[async_trait]
impl Loader for HttpBackend {
  async fn list_collections(&self) -> Result<Vec<Collection>> {
    let url = self.endpoint(&["collections"])?;
    let response: ApiCollectionsResponse = self.send(self.client.get(url), "collections").await?;

    Ok(match response {
      ApiCollectionsResponse::Wrapped { collections } => collections,
      ApiCollectionsResponse::Bare(collections) => collections,
    })
  }

  async fn list_records(&self, collection: &str, params: &ListParams) -> Result<RecordPage> {
    let url = self.endpoint(&["collections", collection, "records"])?;
    let request = self.client.get(url).query(&params.to_query_pairs());
    let resource = format!("collection {}", collection);

    let response: ApiRecordsResponse = self.send(request, &resource).await?;
    Ok(response.into_page(collection))
  }

  async fn get_record(&self, collection: &str, id: &str) -> Result<RecordItem> {
    let url = self.endpoint(&["collections", collection, "records", id])?;
    let resource = format!("record {}/{}", collection, id);

    let record: RecordItem = self.send(self.client.get(url), &resource).await?;
    Ok(adopt(record, collection))
  }
}

#[async_trait]
impl MutationBackend for HttpBackend {
  async fn create_record(&self, collection: &str, fields: &Fields) -> Result<RecordItem> {
    let url = self.endpoint(&["collections", collection, "records"])?;
    let resource = format!("collection {}", collection);

    let record: RecordItem = self
      .send(self.client.post(url).json(fields), &resource)
      .await?;
    Ok(adopt(record, collection))
  }

  async fn replace_record(&self, collection: &str, id: &str, fields: &Fields) -> Result<RecordItem> {
    let url = self.endpoint(&["collections", collection, "records", id])?;
    let resource = format!("record {}/{}", collection, id);

    let record: RecordItem = self.send(self.client.put(url).json(fields), &resource).await?;
    Ok(adopt(record, collection))
  }

  async fn patch_record(&self, collection: &str, id: &str, fields: &Fields) -> Result<RecordItem> {
    let url = self.endpoint(&["collections", collection, "records", id])?;
    let resource = format!("record {}/{}", collection, id);

    let record: RecordItem = self
      .send(self.client.patch(url).json(fields), &resource)
      .await?;
    Ok(adopt(record, collection))
  }

  async fn delete_record(&self, collection: &str, id: &str) -> Result<()> {
    let url = self.endpoint(&["collections", collection, "records", id])?;
    let resource = format!("record {}/{}", collection, id);
    self.send_empty(self.client.delete(url), &resource).await
  }

  async fn create_collection(&self, collection: &NewCollection) -> Result<Collection> {
    let url = self.endpoint(&["collections"])?;
    self
      .send(self.client.post(url).json(collection), "collections")
      .await
  }

  async fn update_collection(&self, slug: &str, changes: &CollectionChanges) -> Result<Collection> {
    let url = self.endpoint(&["collections", slug])?;
    let resource = format!("collection {}", slug);
    self.send(self.client.patch(url).json(changes), &resource).await
  }

  async fn delete_collection(&self, slug: &str) -> Result<()> {
    let url = self.endpoint(&["collections", slug])?;
    let resource = format!("collection {}", slug);
    self.send_empty(self.client.delete(url), &resource).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn backend(base: &str) -> HttpBackend {
    HttpBackend::new(base, Duration::from_secs(5)).unwrap()
  }

  #[test]
  fn test_endpoint_joins_and_encodes_segments() {
    let api = backend("https://api.example.com/v1/");
    let url = api
      .endpoint(&["collections", "orders", "records", "a b"])
      .unwrap();
    assert_eq!(
      url.as_str(),
      "https://api.example.com/v1/collections/orders/records/a%20b"
    );

    let api = backend("https://api.example.com");
    assert_eq!(
      api.endpoint(&["collections"]).unwrap().as_str(),
      "https://api.example.com/collections"
    );
  }

  #[test]
  fn test_invalid_base_url_rejected() {
    assert!(matches!(
      HttpBackend::new("not a url", Duration::from_secs(1)),
      Err(SyncError::InvalidRequest(_))
    ));
    assert!(matches!(
      HttpBackend::new("mailto:admin@example.com", Duration::from_secs(1)),
      Err(SyncError::InvalidRequest(_))
    ));
  }

  #[test]
  fn test_status_mapping() {
    let not_found = error_for_status(StatusCode::NOT_FOUND, String::new(), "record orders/x");
    assert_eq!(not_found, SyncError::not_found("record orders/x"));

    let invalid = error_for_status(
      StatusCode::UNPROCESSABLE_ENTITY,
      r#"{"field":"total","error":"must be positive"}"#.to_string(),
      "collection orders",
    );
    assert_eq!(
      invalid,
      SyncError::Validation(r#"{"field":"total","error":"must be positive"}"#.to_string())
    );

    let conflict = error_for_status(StatusCode::CONFLICT, String::new(), "collections");
    assert_eq!(conflict, SyncError::Conflict("Conflict".to_string()));

    let server = error_for_status(StatusCode::BAD_GATEWAY, "upstream".into(), "collections");
    assert!(server.is_transient());
  }

  #[test]
  fn test_list_response_shapes() {
    let wrapped: ApiRecordsResponse = serde_json::from_value(json!({
      "records": [{ "id": "r1", "fields": { "n": 1 } }],
      "total": 7
    }))
    .unwrap();
    let page = wrapped.into_page("orders");
    assert_eq!(page.total, Some(7));
    assert_eq!(page.records[0].collection, "orders");

    let bare: ApiRecordsResponse =
      serde_json::from_value(json!([{ "id": "r1" }, { "id": "r2" }])).unwrap();
    let page = bare.into_page("orders");
    assert_eq!(page.len(), 2);
    assert_eq!(page.total, None);
  }
}

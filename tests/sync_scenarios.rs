//! End-to-end behavior of the sync layer against the in-process backend.

use resync::backend::Operation;
use resync::cache::{CacheSource, Freshness};
use resync::model::fields_from_value;
use resync::{
  ListParams, MemoryBackend, MutationKind, MutationRequest, QueryStatus, ResourceKey,
  SyncClient, SyncError,
};
use serde_json::json;
use std::time::Duration;

fn fields(value: serde_json::Value) -> resync::Fields {
  fields_from_value(value).unwrap()
}

fn seeded(latency: Option<Duration>) -> (MemoryBackend, SyncClient) {
  let mut backend = MemoryBackend::new();
  if let Some(latency) = latency {
    backend = backend.with_latency(latency);
  }
  backend.insert_collection("widgets", "Widgets");
  backend.insert_record("widgets", "w1", fields(json!({"name": "bolt"})));

  backend.insert_collection("orders", "Orders");
  for (id, total) in [("r1", 10), ("r2", 20), ("r3", 30)] {
    backend.insert_record("orders", id, fields(json!({"total": total})));
  }

  (backend.clone(), SyncClient::new(backend))
}

#[test]
fn test_parameter_order_does_not_change_key() {
  let a = ListParams::from_pairs([("limit", Some("10")), ("offset", Some("0"))]).unwrap();
  let b = ListParams::from_pairs([("offset", Some("0")), ("limit", Some("10"))]).unwrap();
  assert_eq!(
    ResourceKey::listing("widgets", a),
    ResourceKey::listing("widgets", b)
  );

  let unset = ListParams::from_pairs([("limit", None::<&str>), ("q", None)]).unwrap();
  assert_eq!(
    ResourceKey::listing("widgets", unset),
    ResourceKey::full_listing("widgets")
  );
}

#[tokio::test]
async fn test_create_stales_listing_and_reloads_once() {
  let (backend, client) = seeded(None);
  let key = ResourceKey::full_listing("widgets");

  client.listing("widgets", ListParams::new()).await.unwrap();
  assert!(client.store().get(&key).unwrap().is_fresh());

  client
    .use_mutation(MutationKind::Create, "widgets")
    .call(MutationRequest::new(fields(json!({"name": "nut"}))))
    .await
    .unwrap();
  assert_eq!(client.store().get(&key).unwrap().freshness(), Freshness::Stale);

  // Stale value first, then exactly one background reload.
  let stale = client.listing("widgets", ListParams::new()).await.unwrap();
  assert_eq!(stale.source, CacheSource::CacheStale);
  assert_eq!(stale.data.len(), 1);

  while !client.store().get(&key).unwrap().is_fresh() {
    tokio::task::yield_now().await;
  }

  let fresh = client.listing("widgets", ListParams::new()).await.unwrap();
  assert_eq!(fresh.source, CacheSource::CacheFresh);
  assert_eq!(fresh.data.len(), 2);
  assert_eq!(backend.calls(Operation::ListRecords), 2);
}

#[tokio::test]
async fn test_concurrent_resolves_share_one_load() {
  let (backend, client) = seeded(Some(Duration::from_millis(20)));

  let (a, b) = tokio::join!(
    client.listing("widgets", ListParams::new().limit(5)),
    client.listing("widgets", ListParams::new().limit(5)),
  );

  assert_eq!(a.unwrap().data, b.unwrap().data);
  assert_eq!(backend.calls(Operation::ListRecords), 1);
}

#[tokio::test]
async fn test_duplicate_delete_is_local_and_other_rows_are_independent() {
  let (backend, client) = seeded(Some(Duration::from_millis(30)));
  let delete = client.use_mutation(MutationKind::Delete, "orders");

  let first = tokio::spawn({
    let delete = delete.clone();
    async move { delete.call(MutationRequest::delete("r1")).await }
  });
  while !client.is_deleting("orders", "r1") {
    tokio::task::yield_now().await;
  }

  let again = delete.call(MutationRequest::delete("r1")).await;
  assert!(matches!(again, Err(SyncError::DeleteInProgress(_))));
  assert_eq!(backend.calls(Operation::DeleteRecord), 1);

  // A different row is not blocked by the pending delete.
  assert!(!client.is_deleting("orders", "r2"));
  delete.call(MutationRequest::delete("r2")).await.unwrap();

  first.await.unwrap().unwrap();
  assert!(!client.is_deleting("orders", "r1"));
  assert_eq!(backend.calls(Operation::DeleteRecord), 2);
}

#[tokio::test]
async fn test_failed_replace_leaves_cache_untouched() {
  let (backend, client) = seeded(None);
  let key = ResourceKey::record("orders", "r1");
  client.record("orders", "r1").await.unwrap();
  let before = client.store().get(&key).unwrap();

  backend.fail_next(
    Operation::ReplaceRecord,
    SyncError::Validation("total must be positive".into()),
  );
  let result = client
    .use_mutation(MutationKind::Replace, "orders")
    .call(MutationRequest::for_record("r1", fields(json!({"total": -1}))))
    .await;
  assert_eq!(
    result.unwrap_err(),
    SyncError::Validation("total must be positive".into())
  );

  let after = client.store().get(&key).unwrap();
  assert_eq!(after.freshness(), before.freshness());
  assert_eq!(after.value(), before.value());
  assert_eq!(after.resolved_at(), before.resolved_at());
}

#[tokio::test]
async fn test_deleted_record_disappears_from_listing() {
  let (backend, client) = seeded(None);
  let mut listing = client.use_listing("orders", ListParams::new());
  assert_eq!(listing.settled().await.data.as_ref().unwrap().len(), 3);

  client
    .use_mutation(MutationKind::Delete, "orders")
    .call(MutationRequest::delete("r2"))
    .await
    .unwrap();

  let state = listing.settled().await;
  let page = state.data.as_ref().unwrap();
  assert_eq!(page.len(), 2);
  assert!(!page.contains("r2"));
  assert_eq!(backend.calls(Operation::ListRecords), 2);

  // A new view over the same key reads the refreshed entry.
  let mut again = client.use_listing("orders", ListParams::new());
  assert!(!again.settled().await.data.as_ref().unwrap().contains("r2"));
  assert_eq!(backend.calls(Operation::ListRecords), 2);
}

#[tokio::test]
async fn test_missing_record_renders_not_found() {
  let (_, client) = seeded(None);
  let mut view = client.use_record("orders", "missing");

  let state = view.settled().await;
  assert_eq!(state.status, QueryStatus::NotFound);
  assert!(matches!(state.error, Some(SyncError::NotFound { .. })));
}

#[tokio::test]
async fn test_errored_listing_does_not_block_other_keys() {
  let (backend, client) = seeded(None);
  backend.fail_next(Operation::ListRecords, SyncError::Network("offline".into()));

  let err = client.listing("orders", ListParams::new()).await.unwrap_err();
  assert!(err.is_transient());

  let widgets = client.listing("widgets", ListParams::new()).await.unwrap();
  assert_eq!(widgets.data.len(), 1);

  // No automatic retry: the next resolve is a fresh attempt.
  let orders = client.listing("orders", ListParams::new()).await.unwrap();
  assert_eq!(orders.source, CacheSource::Network);
  assert_eq!(backend.calls(Operation::ListRecords), 3);
}

//! Cache layer that orchestrates caching logic with network fetching.

use std::sync::Arc;

use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{request_key, CachedResponse};
use crate::http::{FetchError, Network, Request, Response};
use crate::task::run_detached;

/// Cache layer that manages caching logic and network fetching.
///
/// Storage failures never surface from here: reads degrade to a miss and
/// writes are logged and skipped.
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  network: Arc<dyn Network>,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend and network.
  pub fn new(storage: Arc<dyn CacheStorage>, network: Arc<dyn Network>) -> Self {
    Self { storage, network }
  }

  pub fn storage(&self) -> &Arc<dyn CacheStorage> {
    &self.storage
  }

  pub fn network(&self) -> &Arc<dyn Network> {
    &self.network
  }

  /// Read a cached entry from `bucket`, or from any bucket when `None`.
  pub fn cached(&self, bucket: Option<&str>, key: &str) -> Option<CachedResponse> {
    let result = match bucket {
      Some(bucket) => self.storage.get(bucket, key),
      None => self.storage.lookup(key),
    };
    match result {
      Ok(found) => found,
      Err(e) => {
        warn!(key, error = %e, "cache read failed, treating as miss");
        None
      }
    }
  }

  /// Store a successful response snapshot in `bucket`.
  pub fn store(&self, bucket: &str, request: &Request, response: &Response) {
    if !response.is_success() {
      return;
    }
    let snapshot = CachedResponse::snapshot(&request.url, response);
    if let Err(e) = self.storage.put(bucket, &snapshot.url, &snapshot) {
      warn!(bucket, url = %request.url, error = %e, "cache write failed");
    }
  }

  /// Fetch from network, storing 2xx responses in `bucket`.
  pub async fn fetch_and_store(
    &self,
    request: Request,
    bucket: &str,
  ) -> Result<Response, FetchError> {
    let response = self.network.fetch(request.clone()).await?;
    self.store(bucket, &request, &response);
    Ok(response)
  }

  /// Cache-first with background revalidation.
  ///
  /// 1. Cached (any bucket) - return it and refresh `bucket` in the background
  /// 2. Missing - fetch from network and store
  pub async fn cache_first(&self, request: Request, bucket: &str) -> Result<Response, FetchError> {
    let key = request_key(&request.url);
    if let Some(cached) = self.cached(None, &key) {
      debug!(url = %request.url, "cache hit, revalidating in background");
      let layer = self.clone();
      let bucket = bucket.to_string();
      run_detached("revalidate", async move {
        layer.fetch_and_store(request, &bucket).await.map(|_| ())
      });
      return Ok(cached.to_response());
    }

    self.fetch_and_store(request, bucket).await
  }
}

impl Clone for CacheLayer {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, ResponseSource};
  use crate::testing::MockNetwork;
  use std::time::Duration;
  use url::Url;

  const APP_JS: &str = "http://localhost:3000/app.js";

  fn layer() -> (CacheLayer, Arc<MockNetwork>, Arc<MemoryStorage>) {
    let network = Arc::new(MockNetwork::new());
    let storage = Arc::new(MemoryStorage::new());
    (
      CacheLayer::new(storage.clone(), network.clone()),
      network,
      storage,
    )
  }

  fn request() -> Request {
    Request::get(Url::parse(APP_JS).unwrap())
  }

  #[tokio::test]
  async fn test_fetch_and_store_skips_errors() {
    let (layer, network, storage) = layer();
    network.route(APP_JS, Response::text(500, "oops"));

    let response = layer.fetch_and_store(request(), "static").await.unwrap();
    assert_eq!(response.status, 500);
    assert_eq!(storage.entry_count("static").unwrap(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cache_first_returns_cached_and_revalidates() {
    let (layer, network, storage) = layer();
    network.route(APP_JS, Response::text(200, "v1"));
    layer.fetch_and_store(request(), "static").await.unwrap();

    network.route(APP_JS, Response::text(200, "v2"));
    network.set_latency(Duration::from_secs(60));
    let started = tokio::time::Instant::now();
    let response = layer.cache_first(request(), "static").await.unwrap();
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(response.body, b"v1".to_vec());
    assert_eq!(response.source, ResponseSource::Cache);

    // Background refresh lands for the next request
    tokio::time::sleep(Duration::from_secs(61)).await;
    let key = request_key(&request().url);
    assert_eq!(storage.get("static", &key).unwrap().unwrap().body, b"v2".to_vec());
  }

  #[tokio::test]
  async fn test_failed_revalidation_keeps_cached_entry() {
    let (layer, network, storage) = layer();
    network.route(APP_JS, Response::text(200, "v1"));
    layer.fetch_and_store(request(), "static").await.unwrap();

    network.set_online(false);
    let response = layer.cache_first(request(), "static").await.unwrap();
    assert_eq!(response.body, b"v1".to_vec());

    tokio::time::sleep(Duration::from_millis(10)).await;
    let key = request_key(&request().url);
    assert_eq!(storage.get("static", &key).unwrap().unwrap().body, b"v1".to_vec());
  }

  #[tokio::test]
  async fn test_cache_first_miss_goes_to_network() {
    let (layer, network, storage) = layer();
    network.set_online(false);
    let err = layer.cache_first(request(), "static").await.unwrap_err();
    assert!(matches!(err, FetchError::Network(_)));
    assert_eq!(storage.entry_count("static").unwrap(), 0);
  }
}

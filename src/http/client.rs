//! Retry-aware JSON API client.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::error::{ApiError, ErrorCode};
use super::network::{FetchError, Network};
use super::session::{CredentialRefresher, Session};
use super::types::{Method, Request, Response};
use crate::gateway::SyncQueue;

/// Retry and timeout parameters for API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Retries after the first attempt
  pub max_retries: u32,
  /// Linear backoff step; the nth retry waits `retry_delay * n`
  pub retry_delay: Duration,
  /// Per-attempt timeout
  pub timeout: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      retry_delay: Duration::from_millis(1000),
      timeout: Duration::from_secs(30),
    }
  }
}

impl RetryPolicy {
  pub fn delay_for(&self, retry: u32) -> Duration {
    self.retry_delay * retry
  }
}

/// Resolve an API path beneath `base`, keeping any path prefix on `base`.
///
/// `https://host/v1` with `/api/products` gives `https://host/v1/api/products`.
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url, url::ParseError> {
  let mut base = base.clone();
  if !base.path().ends_with('/') {
    let prefix = format!("{}/", base.path());
    base.set_path(&prefix);
  }
  base.join(path.trim_start_matches('/'))
}

/// API client with timeout, bounded retry, and one-shot re-authentication.
#[derive(Clone)]
pub struct ApiClient {
  network: Arc<dyn Network>,
  base_url: Url,
  policy: RetryPolicy,
  session: Arc<Session>,
  refresher: Option<Arc<dyn CredentialRefresher>>,
  sync_queue: Option<Arc<dyn SyncQueue>>,
}

impl ApiClient {
  pub fn new(network: Arc<dyn Network>, base_url: Url, session: Arc<Session>) -> Self {
    Self {
      network,
      base_url,
      policy: RetryPolicy::default(),
      session,
      refresher: None,
      sync_queue: None,
    }
  }

  pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn with_refresher(mut self, refresher: Arc<dyn CredentialRefresher>) -> Self {
    self.refresher = Some(refresher);
    self
  }

  /// Mutating requests that fail for lack of network are queued here for background sync.
  pub fn with_sync_queue(mut self, queue: Arc<dyn SyncQueue>) -> Self {
    self.sync_queue = Some(queue);
    self
  }

  pub fn session(&self) -> &Arc<Session> {
    &self.session
  }

  pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
    self.request(Method::Get, path, None).await
  }

  pub async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
    self.request(Method::Post, path, Some(body)).await
  }

  pub async fn put(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
    self.request(Method::Put, path, Some(body)).await
  }

  pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
    self.request(Method::Delete, path, None).await
  }

  /// Issue a request and decode the JSON body.
  ///
  /// Transient failures (5xx, network, timeout) are retried with linear
  /// backoff. A 401 triggers exactly one credential refresh and replay; a
  /// second 401 or a failed refresh ends the session.
  pub async fn request(
    &self,
    method: Method,
    path: &str,
    body: Option<&Value>,
  ) -> Result<Value, ApiError> {
    let url = endpoint(&self.base_url, path).map_err(|e| {
      ApiError::new(0, ErrorCode::Client, format!("Invalid path {}: {}", path, e))
    })?;
    let payload = body.map(|b| b.to_string().into_bytes());

    let mut retries = 0u32;
    let mut reauthenticated = false;

    loop {
      let request = self.build_request(method, &url, payload.clone());

      let error = match self.attempt(request.clone()).await {
        Ok(response) if response.is_success() => return decode(&response),
        Ok(response) if response.status == 401 => match &self.refresher {
          Some(refresher) if !reauthenticated => {
            self.reauthenticate(refresher.as_ref()).await?;
            reauthenticated = true;
            continue;
          }
          _ => {
            self.session.end();
            return Err(ApiError::unauthorized("Authentication failed"));
          }
        },
        Ok(response) => ApiError::from_response(&response),
        Err(e) => ApiError::from(e),
      };

      if !error.is_retryable() {
        return Err(error);
      }

      if retries >= self.policy.max_retries {
        warn!(%method, %url, retries, error = %error, "giving up after retries");
        if method.is_mutating() && matches!(error.code, ErrorCode::Network | ErrorCode::Timeout) {
          self.queue_for_sync(&request);
        }
        return Err(error);
      }

      retries += 1;
      let delay = self.policy.delay_for(retries);
      debug!(%method, %url, retries, ?delay, error = %error, "retrying request");
      tokio::time::sleep(delay).await;
    }
  }

  fn build_request(&self, method: Method, url: &Url, body: Option<Vec<u8>>) -> Request {
    let mut request = Request::new(method, url.clone()).with_header("accept", "application/json");
    if let Some(token) = self.session.access_token() {
      request = request.with_header("authorization", format!("Bearer {}", token));
    }
    if let Some(body) = body {
      request = request
        .with_header("content-type", "application/json")
        .with_body(body);
    }
    request
  }

  async fn attempt(&self, request: Request) -> Result<Response, FetchError> {
    let timeout = self.policy.timeout;
    tokio::time::timeout(timeout, self.network.fetch(request))
      .await
      .unwrap_or(Err(FetchError::Timeout(timeout)))
  }

  async fn reauthenticate(&self, refresher: &dyn CredentialRefresher) -> Result<(), ApiError> {
    let refresh_token = self.session.credentials().refresh_token;
    match refresher.refresh(refresh_token).await {
      Ok(credentials) => {
        info!("re-authenticated after 401, replaying request");
        self.session.update(credentials);
        Ok(())
      }
      Err(e) => {
        warn!(error = %e, "credential refresh failed");
        self.session.end();
        Err(ApiError {
          status: 401,
          code: ErrorCode::Unauthorized,
          message: "Authentication failed".to_string(),
          detail: e.detail,
        })
      }
    }
  }

  fn queue_for_sync(&self, request: &Request) {
    let Some(queue) = &self.sync_queue else {
      return;
    };
    match queue.enqueue(request) {
      Ok(()) => info!(method = %request.method, url = %request.url, "queued request for background sync"),
      Err(e) => warn!(error = %e, "failed to queue request for background sync"),
    }
  }
}

fn decode(response: &Response) -> Result<Value, ApiError> {
  response.json_body().map_err(|e| {
    ApiError::new(
      response.status,
      ErrorCode::InvalidResponse,
      format!("Malformed JSON response: {}", e),
    )
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gateway::MemorySyncQueue;
  use crate::http::{BoxFuture, Credentials};
  use crate::testing::MockNetwork;
  use serde_json::json;

  const PRODUCTS: &str = "http://api.test/api/products";

  fn client(network: &Arc<MockNetwork>) -> ApiClient {
    let session = Arc::new(Session::new(Credentials {
      access_token: Some("token-1".into()),
      refresh_token: Some("refresh-1".into()),
    }));
    ApiClient::new(
      network.clone(),
      Url::parse("http://api.test").unwrap(),
      session,
    )
    .with_retry_policy(RetryPolicy {
      max_retries: 3,
      retry_delay: Duration::from_millis(100),
      timeout: Duration::from_secs(5),
    })
  }

  struct StaticRefresher(Result<Credentials, ApiError>);

  impl CredentialRefresher for StaticRefresher {
    fn refresh(
      &self,
      _refresh_token: Option<String>,
    ) -> BoxFuture<Result<Credentials, ApiError>> {
      let result = self.0.clone();
      Box::pin(async move { result })
    }
  }

  #[tokio::test]
  async fn test_success_decodes_json_and_sends_bearer() {
    let network = Arc::new(MockNetwork::new());
    network.route(PRODUCTS, Response::json(200, &json!([{ "id": 1 }])));

    let value = client(&network).get("/api/products").await.unwrap();
    assert_eq!(value, json!([{ "id": 1 }]));
    let sent = network.requests();
    assert_eq!(sent[0].header("authorization"), Some("Bearer token-1"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_server_errors_retry_with_linear_backoff() {
    let network = Arc::new(MockNetwork::new());
    network.script(
      PRODUCTS,
      vec![
        Ok(Response::new(500, Vec::new())),
        Ok(Response::new(503, Vec::new())),
        Ok(Response::json(200, &json!({ "ok": true }))),
      ],
    );

    let started = tokio::time::Instant::now();
    let value = client(&network).get("/api/products").await.unwrap();
    assert_eq!(value, json!({ "ok": true }));
    assert_eq!(network.requests().len(), 3);
    // 100ms + 200ms
    assert_eq!(started.elapsed(), Duration::from_millis(300));
  }

  #[tokio::test(start_paused = true)]
  async fn test_retries_exhaust() {
    let network = Arc::new(MockNetwork::new());
    network.route(PRODUCTS, Response::json(500, &json!({ "error": "boom" })));

    let err = client(&network).get("/api/products").await.unwrap_err();
    assert_eq!(err.status, 500);
    assert_eq!(err.code, ErrorCode::Server);
    assert_eq!(err.message, "boom");
    assert_eq!(network.requests().len(), 4);
  }

  #[tokio::test]
  async fn test_client_errors_are_not_retried() {
    let network = Arc::new(MockNetwork::new());
    network.route(PRODUCTS, Response::json(404, &json!({ "error": "Not found" })));

    let err = client(&network).get("/api/products").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Client);
    assert_eq!(network.requests().len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeout_surfaces_as_timeout() {
    let network = Arc::new(MockNetwork::new());
    network.set_latency(Duration::from_secs(60));
    network.route(PRODUCTS, Response::json(200, &json!({})));

    let err = client(&network).get("/api/products").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Timeout);
    assert_eq!(network.requests().len(), 4);
  }

  #[tokio::test]
  async fn test_401_refreshes_once_and_replays() {
    let network = Arc::new(MockNetwork::new());
    network.script(
      PRODUCTS,
      vec![
        Ok(Response::new(401, Vec::new())),
        Ok(Response::json(200, &json!({ "ok": true }))),
      ],
    );
    let api = client(&network).with_refresher(Arc::new(StaticRefresher(Ok(Credentials {
      access_token: Some("token-2".into()),
      refresh_token: None,
    }))));

    let value = api.get("/api/products").await.unwrap();
    assert_eq!(value, json!({ "ok": true }));

    let sent = network.requests();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].header("authorization"), Some("Bearer token-2"));
    assert_eq!(
      api.session().credentials().refresh_token.as_deref(),
      Some("refresh-1")
    );
  }

  #[tokio::test]
  async fn test_second_401_ends_session() {
    let network = Arc::new(MockNetwork::new());
    network.route(PRODUCTS, Response::new(401, Vec::new()));
    let api = client(&network).with_refresher(Arc::new(StaticRefresher(Ok(Credentials {
      access_token: Some("token-2".into()),
      refresh_token: None,
    }))));

    let err = api.get("/api/products").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Unauthorized);
    assert_eq!(network.requests().len(), 2);
    assert!(!api.session().is_authenticated());
  }

  #[tokio::test]
  async fn test_failed_refresh_ends_session() {
    let network = Arc::new(MockNetwork::new());
    network.route(PRODUCTS, Response::new(401, Vec::new()));
    let api = client(&network).with_refresher(Arc::new(StaticRefresher(Err(
      ApiError::unauthorized("expired"),
    ))));

    let err = api.get("/api/products").await.unwrap_err();
    assert_eq!(err.status, 401);
    assert_eq!(network.requests().len(), 1);
    assert!(!api.session().is_authenticated());
  }

  #[tokio::test(start_paused = true)]
  async fn test_offline_mutation_is_queued_for_sync() {
    let network = Arc::new(MockNetwork::new());
    network.set_online(false);
    let queue = Arc::new(MemorySyncQueue::default());
    let api = client(&network).with_sync_queue(queue.clone());

    let err = api
      .post("/api/products", &json!({ "name": "Milk" }))
      .await
      .unwrap_err();
    assert_eq!(err.code, ErrorCode::Network);

    let pending = queue.pending().unwrap().requests;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request.method, Method::Post);
    assert_eq!(pending[0].request.url.as_str(), PRODUCTS);
  }

  #[test]
  fn test_endpoint_keeps_base_path_prefix() {
    let root = Url::parse("http://api.test").unwrap();
    assert_eq!(endpoint(&root, "/api/products").unwrap().as_str(), PRODUCTS);

    for base in ["https://omnix.example.com/v1", "https://omnix.example.com/v1/"] {
      let base = Url::parse(base).unwrap();
      assert_eq!(
        endpoint(&base, "/api/products").unwrap().as_str(),
        "https://omnix.example.com/v1/api/products"
      );
      assert_eq!(
        endpoint(&base, "api/alerts?status=open").unwrap().as_str(),
        "https://omnix.example.com/v1/api/alerts?status=open"
      );
    }
  }

  #[tokio::test]
  async fn test_request_under_prefixed_base_url() {
    let network = Arc::new(MockNetwork::new());
    network.route(
      "http://api.test/v1/api/products",
      Response::json(200, &json!([{ "id": 1 }])),
    );
    let api = ApiClient::new(
      network.clone(),
      Url::parse("http://api.test/v1").unwrap(),
      Arc::new(Session::new(Credentials::default())),
    );

    assert_eq!(api.get("/api/products").await.unwrap(), json!([{ "id": 1 }]));
    assert_eq!(
      network.requests()[0].url.as_str(),
      "http://api.test/v1/api/products"
    );
  }
}
